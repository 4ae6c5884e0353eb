use crate::cache::Cache;
use crate::config::Args;
use crate::coordinator::AgentCoordinator;
use crate::daemonset::DaemonSetWatcher;
use crate::dispatcher::Dispatcher;
use crate::errors::Result;
use crate::fatal::FatalHandler;
use crate::fatal::ProcessExit;
use crate::lister::KubeListerWatcher;
use crate::podio::HttpPodCoordination;
use crate::pool::AgentPool;
use crate::pool::PodCacheFactory;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use log;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::mpsc;

/*
 * FleetManager wires the informers to the coordinator:
 *
 *   daemonset (list+watch) -> cache -> dispatcher -> daemonset watcher -> agent pool
 *   pods (list+watch)      -> cache -> dispatcher -> pool tracker      -> coordinator -> agents (HTTP)
 *
 * Both caches share the one dispatcher.
 */
pub struct FleetManager {
    kube_client: KubeClient,
    args: Args,
}

impl FleetManager {

    pub fn new(kube_client: KubeClient, args: Args) -> Self {
	Self{
	    kube_client: kube_client,
	    args: args,
	}
    }

    fn pod_caches(&self, dispatcher: &Dispatcher, fatal: &Arc<dyn FatalHandler>) -> PodCacheFactory {
	let client = self.kube_client.clone();
	let namespace = self.args.namespace.clone();
	let selector = self.args.label_selector();
	let dispatcher = dispatcher.clone();
	let fatal = fatal.clone();

	Box::new(move || {
	    let pods: KubeApi<Pod> = KubeApi::namespaced(client.clone(), &namespace);
	    let lister = KubeListerWatcher::new(pods, selector.clone());
	    Cache::new("agent pods", Arc::new(lister), dispatcher.clone(), fatal.clone())
	})
    }

    fn daemonset_cache(&self, dispatcher: &Dispatcher, fatal: &Arc<dyn FatalHandler>) -> Arc<Cache<DaemonSet>> {
	let daemonsets: KubeApi<DaemonSet> = KubeApi::namespaced(self.kube_client.clone(), &self.args.namespace);
	let lister = KubeListerWatcher::new(daemonsets, None).with_fields(&self.args.daemonset_selector());
	Cache::new("agent daemonsets", Arc::new(lister), dispatcher.clone(), fatal.clone())
    }

    /*
     * Runs until the agent pool goes away. Anything structural going wrong in
     * the informers terminates the process.
     */
    pub async fn run(&self) -> Result<()> {
	let fatal: Arc<dyn FatalHandler> = Arc::new(ProcessExit);
	let dispatcher = Dispatcher::spawn(fatal.clone());

	let (agents_tx, agents_rx) = mpsc::unbounded_channel();
	let (pool_tx, pool_rx) = mpsc::unbounded_channel();
	let pool = AgentPool::new(self.pod_caches(&dispatcher, &fatal), dispatcher.clone(), fatal.clone(), agents_tx);

	let io = HttpPodCoordination::new(self.args.agent_port, self.args.agent_timeout())?;
	let coordinator = AgentCoordinator::new(io, StdRng::from_entropy(), self.args.tick_interval());

	log::info!("Watching DaemonSet {} in namespace {}, agent pods matching {:?}",
		   self.args.daemonset_name, self.args.namespace, self.args.label_selector());
	let daemonsets = self.daemonset_cache(&dispatcher, &fatal);
	let subscription = DaemonSetWatcher::new(daemonsets, pool_tx).start().await?;

	tokio::join!(pool.run(pool_rx), coordinator.run(agents_rx));
	subscription.dispose();
	Ok(())
    }
}
