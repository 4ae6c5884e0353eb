use crate::errors::Error;
use crate::errors::Result;

use async_trait::async_trait;
use fleet_api as api;
use fleet_api::coordination::ASSIGNED_PATH;
use fleet_api::coordination::COORDINATION_PATH;
use std::collections::BTreeSet;
use std::time::Duration;

/*
 * How the coordinator talks to a single agent.
 */
#[async_trait]
pub trait PodCoordinationIo: Send + Sync {

    /* Fetch which resources the agent requests and which it holds */
    async fn poll(&self, agent: &api::AgentRef) -> Result<api::CoordinationRecord>;

    /* Replace the set of resources the agent is assigned to */
    async fn assign(&self, agent: &api::AgentRef, resources: &BTreeSet<api::ResourceName>) -> Result<()>;
}

/*
 * HttpPodCoordination reaches the agents on their node address:
 *
 *   GET http://<hostIP>:<port>/coordination           -> {"requested":[..],"assigned":[..]}
 *   PUT http://<hostIP>:<port>/coordination/assigned  <- ["resource", ...]
 */
pub struct HttpPodCoordination {
    client: reqwest::Client,
    port: u16,
}

impl HttpPodCoordination {

    pub fn new(port: u16, timeout: Duration) -> Result<Self> {
	let client = reqwest::Client::builder()
	    .timeout(timeout)
	    .build()?;

	Ok(Self{
	    client: client,
	    port: port,
	})
    }

    fn url(&self, agent: &api::AgentRef, path: &str) -> Result<String> {
	match &agent.host_ip {
	    Some(ip) => Ok(format!("http://{}:{}{}", ip, self.port, path)),
	    None => Err(Error::coordination(&agent.name, "pod has no host IP yet")),
	}
    }
}

#[async_trait]
impl PodCoordinationIo for HttpPodCoordination {

    async fn poll(&self, agent: &api::AgentRef) -> Result<api::CoordinationRecord> {
	let url = self.url(agent, COORDINATION_PATH)?;
	let response = self.client.get(&url).send().await?;

	let status = response.status();
	if status.is_client_error() || status.is_server_error() {
	    return Err(Error::coordination(&agent.name, format!("polling resulted in HTTP error response {}", status)));
	}

	let body = response.bytes().await?;
	serde_json::from_slice(&body)
	    .map_err(|err| Error::coordination(&agent.name, format!("unable to decode coordination record: {}", err)))
    }

    async fn assign(&self, agent: &api::AgentRef, resources: &BTreeSet<api::ResourceName>) -> Result<()> {
	let url = self.url(agent, ASSIGNED_PATH)?;
	let response = self.client.put(&url).json(resources).send().await?;

	let status = response.status();
	if status.is_client_error() || status.is_server_error() {
	    return Err(Error::coordination(&agent.name, format!("assignment resulted in HTTP error response {}", status)));
	}
	Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use test_log::test;

    fn io() -> HttpPodCoordination {
	HttpPodCoordination::new(api::AGENT_PORT, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn urls_point_at_the_node_address() {
	let agent = api::AgentRef::new("a1", "instana-agent-x7k2p", Some("10.0.0.7"));

	assert_eq!(io().url(&agent, COORDINATION_PATH).unwrap(), "http://10.0.0.7:42699/coordination");
	assert_eq!(io().url(&agent, ASSIGNED_PATH).unwrap(), "http://10.0.0.7:42699/coordination/assigned");
    }

    #[test(tokio::test)]
    async fn agent_without_address_fails() {
	let agent = api::AgentRef::new("a1", "instana-agent-x7k2p", None);

	match io().poll(&agent).await {
	    Err(Error::Coordination { agent, .. }) => assert_eq!(agent, "instana-agent-x7k2p"),
	    other => panic!("expected a coordination error, got {:?}", other),
	}
	assert!(io().assign(&agent, &BTreeSet::new()).await.is_err());
    }

    #[test(tokio::test)]
    async fn unreachable_agent_fails() {
	// nothing listens on port 1
	let io = HttpPodCoordination::new(1, Duration::from_secs(1)).unwrap();
	let agent = api::AgentRef::new("a1", "instana-agent-x7k2p", Some("127.0.0.1"));

	assert!(matches!(io.poll(&agent).await, Err(Error::Http(_))));
    }
}
