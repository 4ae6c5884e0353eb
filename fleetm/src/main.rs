mod cache;
mod config;
mod coordinator;
mod daemonset;
mod dispatcher;
mod errors;
mod fatal;
mod lister;
mod manager;
mod podio;
mod pool;
mod snapshot;
use config::Args;
use manager::FleetManager;

use clap::Parser;
use kube::Client as KubeClient;
use log;

/*
 * Program design:
 *
 *  1. Keep an up to date view of the agent pods of the fleet
 *  2. Every tick, ask each agent which resources it wants to lead
 *  3. Make sure each requested resource has exactly one leader
 *  4. Tell the agents whose set of led resources changed
 */
#[tokio::main]
async fn main() -> errors::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let kube_client = KubeClient::try_default().await?;

    log::info!("starting fleetm for namespace {}", args.namespace);
    let mgr = FleetManager::new(kube_client, args);
    tokio::select! {
	res = mgr.run() => res?,

	// handle CTRL^C as gracefully as we can.
	_ = tokio::signal::ctrl_c() => {},
    }
    Ok(())
}
