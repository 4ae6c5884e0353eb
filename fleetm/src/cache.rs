use crate::dispatcher::Dispatcher;
use crate::dispatcher::SubscriberId;
use crate::errors::Error;
use crate::errors::Result;
use crate::fatal::FatalHandler;
use crate::lister::ListerWatcher;
use crate::lister::WatchNotification;
use crate::lister::WatchStream;
use crate::snapshot::parse_version;
use crate::snapshot::SnapshotMap;

use futures::StreamExt;
use kube::Resource;
use log;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use tokio::task::JoinHandle;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/*
 * Emitted only when the snapshot actually changed. It carries the uid only,
 * subscribers read the current object back with Cache::get().
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub kind: EventKind,
    pub uid: String,
}

/*
 * Cache mirrors one kubernetes collection: a full list first, then a live
 * watch. Every change that makes it into the snapshot is handed to the
 * dispatcher, stale or duplicated notifications are dropped on the floor.
 *
 * Anything that breaks the event stream is fatal: we log, call the fatal
 * handler and let the pod restart, a fresh list is the only safe recovery.
 */
pub struct Cache<K> {
    name: String,
    map: Mutex<SnapshotMap<Arc<K>>>,
    lister: Arc<dyn ListerWatcher<K>>,
    dispatcher: Dispatcher,
    fatal: Arc<dyn FatalHandler>,
    subscribed: AtomicBool,
}

/*
 * Keeps the watch open. Dropping or disposing it closes the watch right away,
 * events already handed to the dispatcher are still delivered.
 */
pub struct Subscription {
    id: SubscriberId,
    dispatcher: Dispatcher,
    pump: JoinHandle<()>,
}

impl Subscription {
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
	self.pump.abort();
	self.dispatcher.unregister(self.id);
    }
}

impl<K> Cache<K>
where
    K: Resource + Send + Sync + 'static,
{

    pub fn new(name: &str, lister: Arc<dyn ListerWatcher<K>>, dispatcher: Dispatcher, fatal: Arc<dyn FatalHandler>) -> Arc<Self> {
	Arc::new(Self{
	    name: name.to_string(),
	    map: Mutex::new(SnapshotMap::new()),
	    lister: lister,
	    dispatcher: dispatcher,
	    fatal: fatal,
	    subscribed: AtomicBool::new(false),
	})
    }

    /*
     * Reflects the highest version delivered so far, nothing more.
     */
    pub fn get(&self, uid: &str) -> Option<Arc<K>> {
	self.lock().get(uid)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
	self.lock().len()
    }

    /*
     * Lists the collection, replays every item as Added, then opens the watch.
     * The handler runs on the dispatcher; the list replay is queued before the
     * watch even exists, so it always reaches the handler first.
     */
    pub async fn subscribe<H>(self: &Arc<Self>, handler: H) -> Result<Subscription>
    where
	H: FnMut(&CacheEvent) -> Result<()> + Send + 'static,
    {
	if self.subscribed.swap(true, Ordering::SeqCst) {
	    return Err(Error::Other(format!("cache '{}' already has a subscriber", self.name)));
	}

	let id = self.dispatcher.register(handler).map_err(|err| self.fail(err))?;

	log::info!("Listing {} ...", self.name);
	let listing = self.lister.list().await.map_err(|err| self.fail(err))?;
	log::debug!("Listed {} {} at resource version {:?}", listing.items.len(), self.name, listing.resource_version);

	for item in listing.items {
	    self.ingest(id, EventKind::Added, item).map_err(|err| self.fail(err))?;
	}

	let stream = self.lister.watch(listing.resource_version).await.map_err(|err| self.fail(err))?;
	let cache = self.clone();
	let pump = tokio::spawn(async move {
	    cache.pump(id, stream).await
	});

	Ok(Subscription{
	    id: id,
	    dispatcher: self.dispatcher.clone(),
	    pump: pump,
	})
    }

    async fn pump(self: Arc<Self>, id: SubscriberId, mut stream: WatchStream<K>) {
	while let Some(notification) = stream.next().await {
	    let outcome = match notification {
		Ok(WatchNotification::Added(obj)) => self.ingest(id, EventKind::Added, obj),
		Ok(WatchNotification::Modified(obj)) => self.ingest(id, EventKind::Modified, obj),
		Ok(WatchNotification::Deleted(obj)) => self.ingest(id, EventKind::Deleted, obj),
		Err(err) => Err(err),
	    };

	    if let Err(err) = outcome {
		self.fail(err);
		return;
	    }
	}

	log::debug!("Watch on {} closed", self.name);
    }

    /*
     * Applies one change under the collection lock, and queues the event
     * while still holding it so events for a uid leave in version order.
     *
     * Returns true if the snapshot changed.
     */
    fn ingest(&self, id: SubscriberId, kind: EventKind, obj: K) -> Result<bool> {
	let meta = obj.meta();
	let uid = match &meta.uid {
	    Some(uid) => uid.clone(),
	    None => {
		log::warn!("Ignoring {:?} event for {} object {:?} without uid", kind, self.name, meta.name);
		return Ok(false);
	    }
	};
	let version = parse_version(meta.resource_version.as_deref());

	let mut map = self.lock();
	let updated = match kind {
	    EventKind::Added | EventKind::Modified => map.put_if_newer(&uid, version, Arc::new(obj)),
	    EventKind::Deleted => map.remove(&uid, version),
	};

	if updated {
	    self.dispatcher.deliver(id, CacheEvent{ kind: kind, uid: uid })?;
	} else {
	    log::debug!("Dropping stale {:?} event for {} {} at version {}", kind, self.name, uid, version);
	}
	Ok(updated)
    }

    /*
     * A stopped dispatcher has already gone through the fatal handler.
     */
    fn fail(&self, err: Error) -> Error {
	match err {
	    Error::DispatcherStopped => {
		log::debug!("Dispatcher stopped, {} cache stops forwarding events", self.name);
	    },
	    _ => {
		log::error!("Unrecoverable error in {} cache: {}", self.name, err);
		self.fatal.terminate(-1);
	    },
	}
	err
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SnapshotMap<Arc<K>>> {
	self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
