use crate::cache::Cache;
use crate::cache::CacheEvent;
use crate::cache::Subscription;
use crate::dispatcher::Dispatcher;
use crate::errors::Error;
use crate::errors::Result;
use crate::fatal::FatalHandler;

use fleet_api as api;
use k8s_openapi::api::core::v1::Pod;
use log;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use tokio::sync::mpsc;

/* What the coordinator learns about the agent pool */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Added(api::AgentRef),
    Deleted(String),
}

/*
 * Decides which pods of the watched collection are agents we can talk to.
 */
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    // uid of the DaemonSet the agent pods must be owned by, when set
    pub owner_uid: Option<String>,
}

impl AgentFilter {

    pub fn owned_by(uid: &str) -> Self {
	Self{
	    owner_uid: Some(uid.to_string()),
	}
    }

    pub fn accepts(&self, pod: &Pod) -> bool {
	if !api::agent::is_running(pod) {
	    return false;
	}
	match &self.owner_uid {
	    Some(uid) => api::agent::is_owned_by(pod, uid),
	    None => true,
	}
    }
}

/*
 * The uids announced to the coordinator as added and not yet as deleted.
 * Shared between a tracker and the pool that retracts them when the
 * DaemonSet goes away.
 */
#[derive(Debug, Clone, Default)]
pub struct KnownAgents {
    uids: Arc<Mutex<HashSet<String>>>,
}

impl KnownAgents {

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
	self.uids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, uid: &str) -> bool {
	self.lock().insert(uid.to_string())
    }

    fn remove(&self, uid: &str) -> bool {
	self.lock().remove(uid)
    }

    /* Empties the set, uids come back sorted */
    pub fn drain(&self) -> Vec<String> {
	let mut uids: Vec<String> = self.lock().drain().collect();
	uids.sort();
	uids
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
	self.lock().len()
    }
}

/*
 * AgentPoolTracker turns pod cache events into agent added/deleted events.
 *
 * It runs on the dispatcher. A pod that stops passing the filter (not
 * running anymore, or gone from the cache) is reported as deleted.
 */
pub struct AgentPoolTracker {
    cache: Arc<Cache<Pod>>,
    filter: AgentFilter,
    known: KnownAgents,
    sink: mpsc::UnboundedSender<AgentEvent>,
}

impl AgentPoolTracker {

    pub fn new(cache: Arc<Cache<Pod>>, filter: AgentFilter, sink: mpsc::UnboundedSender<AgentEvent>) -> Self {
	Self{
	    cache: cache,
	    filter: filter,
	    known: KnownAgents::default(),
	    sink: sink,
	}
    }

    /*
     * Subscribes the tracker to its cache, the returned subscription keeps
     * the watch open.
     */
    pub async fn start(self) -> Result<Subscription> {
	let cache = self.cache.clone();
	let mut tracker = self;

	cache.subscribe(move |event: &CacheEvent| tracker.on_event(event)).await
    }

    pub fn on_event(&mut self, event: &CacheEvent) -> Result<()> {
	let pod = self.cache.get(&event.uid);
	let agent = pod.as_deref()
	    .filter(|pod| self.filter.accepts(pod))
	    .and_then(api::AgentRef::from_pod);

	match agent {
	    Some(agent) => {
		if self.known.insert(&event.uid) {
		    log::info!("Agent pod {} joined the pool", agent.name);
		    send(&self.sink, AgentEvent::Added(agent))?;
		}
	    },
	    None => {
		if self.known.remove(&event.uid) {
		    log::info!("Agent pod {} left the pool", event.uid);
		    send(&self.sink, AgentEvent::Deleted(event.uid.clone()))?;
		}
	    },
	}
	Ok(())
    }

    pub fn known(&self) -> KnownAgents {
	self.known.clone()
    }
}

fn send(sink: &mpsc::UnboundedSender<AgentEvent>, event: AgentEvent) -> Result<()> {
    sink.send(event)
	.map_err(|_| Error::Subscriber(String::from("agent coordinator is not running")))
}

/* What the DaemonSet informer asks of the agent pool */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolCommand {
    Start { uid: String, name: String },
    Stop,
}

/* Builds a fresh pod cache, every DaemonSet gets its own */
pub type PodCacheFactory = Box<dyn Fn() -> Arc<Cache<Pod>> + Send + Sync>;

struct Watching {
    daemonset_uid: String,
    daemonset_name: String,
    subscription: Subscription,
    known: KnownAgents,
}

/*
 * AgentPool follows the agent DaemonSet: its agent pods are tracked while it
 * exists, and when it is deleted the pod watch is closed and every agent it
 * owned is reported deleted, which leaves the coordinator idle.
 *
 * Only one agent DaemonSet is expected. Seeing a second one is fatal.
 */
pub struct AgentPool {
    pods: PodCacheFactory,
    dispatcher: Dispatcher,
    fatal: Arc<dyn FatalHandler>,
    sink: mpsc::UnboundedSender<AgentEvent>,
    watching: Option<Watching>,
}

impl AgentPool {

    pub fn new(pods: PodCacheFactory, dispatcher: Dispatcher, fatal: Arc<dyn FatalHandler>, sink: mpsc::UnboundedSender<AgentEvent>) -> Self {
	Self{
	    pods: pods,
	    dispatcher: dispatcher,
	    fatal: fatal,
	    sink: sink,
	    watching: None,
	}
    }

    pub async fn handle(&mut self, command: PoolCommand) -> Result<()> {
	match command {
	    PoolCommand::Start{ uid, name } => self.start(&uid, &name).await,
	    PoolCommand::Stop => self.stop().await,
	}
    }

    async fn start(&mut self, uid: &str, name: &str) -> Result<()> {
	if let Some(watching) = &self.watching {
	    if watching.daemonset_uid == uid {
		return Ok(());
	    }
	    log::error!("DaemonSet {} was added, but DaemonSet {} is already watched", name, watching.daemonset_name);
	    self.fatal.terminate(-1);
	    return Err(Error::Other(format!("unexpected second agent DaemonSet {}", name)));
	}

	log::info!("Looking for agent pods in DaemonSet {} ...", name);
	let tracker = AgentPoolTracker::new((self.pods)(), AgentFilter::owned_by(uid), self.sink.clone());
	let known = tracker.known();
	let subscription = tracker.start().await?;

	self.watching = Some(Watching{
	    daemonset_uid: uid.to_string(),
	    daemonset_name: name.to_string(),
	    subscription: subscription,
	    known: known,
	});
	Ok(())
    }

    /*
     * The flush makes sure pod events queued before the dispose have been
     * handled, so nothing shows up as added after the agents are retracted.
     */
    async fn stop(&mut self) -> Result<()> {
	let watching = match self.watching.take() {
	    Some(watching) => watching,
	    None => return Ok(()),
	};

	log::info!("DaemonSet {} is gone, retracting its agents", watching.daemonset_name);
	watching.subscription.dispose();
	self.dispatcher.flush().await?;

	for uid in watching.known.drain() {
	    send(&self.sink, AgentEvent::Deleted(uid))?;
	}
	Ok(())
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PoolCommand>) {
	while let Some(command) = commands.recv().await {
	    log::debug!("Agent pool received {:?}", command);
	    if let Err(err) = self.handle(command).await {
		log::error!("Agent pool stopped: {}", err);
		return;
	    }
	}

	if let Err(err) = self.stop().await {
	    log::debug!("Agent pool could not retract its agents: {}", err);
	}
    }
}
