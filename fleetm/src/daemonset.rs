use crate::cache::Cache;
use crate::cache::CacheEvent;
use crate::cache::EventKind;
use crate::cache::Subscription;
use crate::errors::Error;
use crate::errors::Result;
use crate::pool::PoolCommand;

use k8s_openapi::api::apps::v1::DaemonSet;
use kube::ResourceExt;
use log;
use std::sync::Arc;
use tokio::sync::mpsc;

/*
 * DaemonSetWatcher turns the agent DaemonSet coming and going into commands
 * for the agent pool. It runs on the dispatcher next to the pod trackers.
 */
pub struct DaemonSetWatcher {
    cache: Arc<Cache<DaemonSet>>,
    commands: mpsc::UnboundedSender<PoolCommand>,
}

impl DaemonSetWatcher {

    pub fn new(cache: Arc<Cache<DaemonSet>>, commands: mpsc::UnboundedSender<PoolCommand>) -> Self {
	Self{
	    cache: cache,
	    commands: commands,
	}
    }

    pub async fn start(self) -> Result<Subscription> {
	let cache = self.cache.clone();
	let watcher = self;

	cache.subscribe(move |event: &CacheEvent| watcher.on_event(event)).await
    }

    pub fn on_event(&self, event: &CacheEvent) -> Result<()> {
	let command = match event.kind {
	    EventKind::Added => match self.cache.get(&event.uid) {
		Some(daemonset) => PoolCommand::Start{
		    uid: event.uid.clone(),
		    name: daemonset.name_any(),
		},
		None => return Ok(()),
	    },
	    EventKind::Modified => return Ok(()),
	    EventKind::Deleted => PoolCommand::Stop,
	};

	log::debug!("Agent DaemonSet {:?} {}", event.kind, event.uid);
	self.commands.send(command)
	    .map_err(|_| Error::Subscriber(String::from("agent pool is not running")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::fatal::testing::RecordingFatal;
    use crate::lister::testing::FakeListerWatcher;
    use crate::lister::WatchNotification;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;
    use std::time::Duration;
    use test_log::test;

    fn daemonset(uid: &str, version: &str) -> DaemonSet {
	DaemonSet {
	    metadata: ObjectMeta {
		name: Some("instana-agent".to_string()),
		namespace: Some("instana-agent".to_string()),
		uid: Some(uid.to_string()),
		resource_version: Some(version.to_string()),
		..Default::default()
	    },
	    ..Default::default()
	}
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<PoolCommand>) -> PoolCommand {
	tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
	    .expect("timed out waiting for pool command")
	    .expect("pool command channel closed")
    }

    #[test(tokio::test)]
    async fn daemonset_drives_the_pool() {
	let fatal = Arc::new(RecordingFatal::default());
	let dispatcher = Dispatcher::spawn(fatal.clone());
	let (lister, watch) = FakeListerWatcher::new(vec![daemonset("ds-1", "1")]);
	let cache = Cache::new("agent daemonsets", Arc::new(lister), dispatcher.clone(), fatal.clone());
	let (tx, mut rx) = mpsc::unbounded_channel();

	let _subscription = DaemonSetWatcher::new(cache, tx).start().await.unwrap();
	assert_eq!(next(&mut rx).await, PoolCommand::Start{ uid: "ds-1".to_string(), name: "instana-agent".to_string() });

	// rollouts only modify it
	watch.unbounded_send(Ok(WatchNotification::Modified(daemonset("ds-1", "2")))).unwrap();
	watch.unbounded_send(Ok(WatchNotification::Deleted(daemonset("ds-1", "3")))).unwrap();
	watch.unbounded_send(Ok(WatchNotification::Added(daemonset("ds-9", "4")))).unwrap();

	assert_eq!(next(&mut rx).await, PoolCommand::Stop);
	assert_eq!(next(&mut rx).await, PoolCommand::Start{ uid: "ds-9".to_string(), name: "instana-agent".to_string() });

	dispatcher.flush().await.unwrap();
	assert!(rx.try_recv().is_err());
	assert!(!fatal.invoked());
    }

    #[test(tokio::test)]
    async fn closed_pool_is_an_error() {
	let fatal = Arc::new(RecordingFatal::default());
	let dispatcher = Dispatcher::spawn(fatal.clone());
	let (lister, _watch) = FakeListerWatcher::new(vec![daemonset("ds-1", "1")]);
	let cache = Cache::new("agent daemonsets", Arc::new(lister), dispatcher, fatal.clone());
	let (tx, rx) = mpsc::unbounded_channel();
	drop(rx);

	let _subscription = DaemonSetWatcher::new(cache, tx).start().await.unwrap();

	tokio::time::timeout(Duration::from_secs(5), async {
	    while !fatal.invoked() {
		tokio::time::sleep(Duration::from_millis(5)).await;
	    }
	}).await.expect("fatal handler was not invoked");
    }
}
