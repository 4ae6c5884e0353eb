use crate::coordinator::DEFAULT_TICK_INTERVAL;

use clap::Parser;
use fleet_api as api;
use std::time::Duration;

/*
 * Command line of the fleet manager, every flag can also come from the
 * environment.
 */
#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct Args {
    /* namespace the agent pods run in */
    #[arg(long, env = "FLEET_NAMESPACE", default_value = "instana-agent")]
    pub namespace: String,

    /* label selector matching the agent pods */
    #[arg(long, env = "FLEET_AGENT_SELECTOR", default_value = "app.kubernetes.io/name=instana-agent")]
    pub agent_selector: String,

    /* the agent DaemonSet, only pods it owns are agents */
    #[arg(long, env = "FLEET_DAEMONSET_NAME", default_value = "instana-agent")]
    pub daemonset_name: String,

    #[arg(long, env = "FLEET_TICK_INTERVAL_SECS", default_value_t = DEFAULT_TICK_INTERVAL.as_secs())]
    pub tick_interval_secs: u64,

    #[arg(long, env = "FLEET_AGENT_PORT", default_value_t = api::AGENT_PORT)]
    pub agent_port: u16,

    /* per request timeout talking to an agent */
    #[arg(long, env = "FLEET_AGENT_TIMEOUT_SECS", default_value_t = 5)]
    pub agent_timeout_secs: u64,
}

impl Args {

    pub fn tick_interval(&self) -> Duration {
	Duration::from_secs(self.tick_interval_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
	Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn daemonset_selector(&self) -> String {
	format!("metadata.name={}", self.daemonset_name)
    }

    pub fn label_selector(&self) -> Option<String> {
	match self.agent_selector.trim() {
	    "" => None,
	    selector => Some(selector.to_string()),
	}
    }
}
