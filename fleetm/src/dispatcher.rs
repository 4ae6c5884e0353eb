use crate::cache::CacheEvent;
use crate::errors::Error;
use crate::errors::Result;
use crate::fatal::FatalHandler;

use log;
use std::any::Any;
use std::collections::HashMap;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

pub type SubscriberId = u64;

/*
 * A subscriber callback. It only ever runs on the dispatcher task, so it may
 * keep plain mutable state without any locking.
 */
pub type Handler = Box<dyn FnMut(&CacheEvent) -> Result<()> + Send>;

enum Command {
    Register(SubscriberId, Handler),
    Deliver(SubscriberId, CacheEvent),
    Unregister(SubscriberId),
    Flush(oneshot::Sender<()>),
}

/*
 * Dispatcher is the single sequential context all cache events go through,
 * for every collection. Producers (list and watch paths) only enqueue, so a
 * slow subscriber never blocks them, and callbacks never run concurrently.
 *
 * A callback failing, by error or panic, is fatal.
 */
#[derive(Clone)]
pub struct Dispatcher {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {

    pub fn spawn(fatal: Arc<dyn FatalHandler>) -> Self {
	let (tx, rx) = mpsc::unbounded_channel();
	tokio::spawn(run(rx, fatal));

	Self{
	    commands: tx,
	    next_id: Arc::new(AtomicU64::new(1)),
	}
    }

    pub fn register<H>(&self, handler: H) -> Result<SubscriberId>
    where
	H: FnMut(&CacheEvent) -> Result<()> + Send + 'static,
    {
	let id = self.next_id.fetch_add(1, Ordering::Relaxed);
	self.send(Command::Register(id, Box::new(handler)))?;
	Ok(id)
    }

    pub fn deliver(&self, id: SubscriberId, event: CacheEvent) -> Result<()> {
	self.send(Command::Deliver(id, event))
    }

    /*
     * Deliveries queued before this call still reach the subscriber.
     */
    pub fn unregister(&self, id: SubscriberId) {
	if self.send(Command::Unregister(id)).is_err() {
	    log::debug!("Dispatcher already stopped while unregistering subscriber {}", id);
	}
    }

    /*
     * Resolves once everything enqueued before the call has been handled.
     */
    pub async fn flush(&self) -> Result<()> {
	let (tx, rx) = oneshot::channel();
	self.send(Command::Flush(tx))?;
	rx.await.map_err(|_| Error::DispatcherStopped)
    }

    fn send(&self, command: Command) -> Result<()> {
	self.commands.send(command)
	    .map_err(|_| Error::DispatcherStopped)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
	return msg.to_string();
    }
    match payload.downcast_ref::<String>() {
	Some(msg) => msg.clone(),
	None => String::from("unknown panic"),
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>, fatal: Arc<dyn FatalHandler>) {
    let mut handlers: HashMap<SubscriberId, Handler> = HashMap::new();

    while let Some(command) = commands.recv().await {
	match command {
	    Command::Register(id, handler) => {
		handlers.insert(id, handler);
	    },
	    Command::Unregister(id) => {
		handlers.remove(&id);
	    },
	    Command::Flush(done) => {
		let _ = done.send(());
	    },
	    Command::Deliver(id, event) => {
		let handler = match handlers.get_mut(&id) {
		    Some(handler) => handler,
		    None => {
			log::debug!("Dropping {:?}, subscriber {} is gone", event, id);
			continue;
		    }
		};

		let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
		    Ok(Ok(())) => continue,
		    Ok(Err(err)) => err.to_string(),
		    Err(payload) => panic_message(payload),
		};

		log::error!("Subscriber {} failed to handle {:?}: {}", id, event, failure);
		fatal.terminate(-1);
		return;
	    },
	}
    }
}
