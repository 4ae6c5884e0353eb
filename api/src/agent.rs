use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/*
 * AgentRef is what the operator needs to remember about an agent pod in
 * order to talk to it.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRef {
    pub uid: String,
    pub name: String,
    pub namespace: Option<String>,

    // agents run on the host network, so the node address reaches them
    pub host_ip: Option<String>,
}

impl AgentRef {

    /*
     * Builds a reference from a pod, a pod without uid cannot be tracked and
     * yields None.
     */
    pub fn from_pod(pod: &Pod) -> Option<Self> {
	let uid = pod.uid()?;
	let host_ip = pod.status.as_ref().and_then(|status| status.host_ip.clone());

	Some(Self{
	    uid: uid,
	    name: pod.name_any(),
	    namespace: pod.namespace(),
	    host_ip: host_ip,
	})
    }

    pub fn new(uid: &str, name: &str, host_ip: Option<&str>) -> Self {
	Self{
	    uid: uid.to_string(),
	    name: name.to_string(),
	    namespace: None,
	    host_ip: host_ip.map(|ip| ip.to_string()),
	}
    }
}

pub fn is_running(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());

    phase.map_or(false, |phase| phase.eq_ignore_ascii_case("Running"))
}

/*
 * Returns true when one of the pod's owner references points at the object
 * with the given uid, e.g. the agent DaemonSet.
 */
pub fn is_owned_by(pod: &Pod, owner_uid: &str) -> bool {
    pod.owner_references()
	.iter()
	.any(|owner| owner.uid == owner_uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use similar_asserts::assert_eq;

    fn agent_pod(uid: Option<&str>, phase: &str, owner_uid: &str) -> Pod {
	Pod {
	    metadata: ObjectMeta {
		name: Some("instana-agent-x7k2p".to_string()),
		namespace: Some("instana-agent".to_string()),
		uid: uid.map(|uid| uid.to_string()),
		owner_references: Some(vec![OwnerReference {
		    kind: "DaemonSet".to_string(),
		    name: "instana-agent".to_string(),
		    uid: owner_uid.to_string(),
		    ..Default::default()
		}]),
		..Default::default()
	    },
	    spec: None,
	    status: Some(PodStatus {
		phase: Some(phase.to_string()),
		host_ip: Some("10.0.0.7".to_string()),
		..Default::default()
	    }),
	}
    }

    #[test]
    fn agent_ref_from_pod() {
	let pod = agent_pod(Some("a1"), "Running", "ds-1");
	let agent = AgentRef::from_pod(&pod).unwrap();

	assert_eq!(agent.uid, "a1");
	assert_eq!(agent.name, "instana-agent-x7k2p");
	assert_eq!(agent.namespace.as_deref(), Some("instana-agent"));
	assert_eq!(agent.host_ip.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn pod_without_uid_is_not_an_agent() {
	assert!(AgentRef::from_pod(&agent_pod(None, "Running", "ds-1")).is_none());
    }

    #[test]
    fn running_and_ownership() {
	let pending = agent_pod(Some("a1"), "Pending", "ds-1");
	let running = agent_pod(Some("a1"), "Running", "ds-1");

	assert!(!is_running(&pending));
	assert!(is_running(&running));
	assert!(is_running(&agent_pod(Some("a1"), "running", "ds-1")));
	assert!(is_owned_by(&running, "ds-1"));
	assert!(!is_owned_by(&running, "ds-2"));
    }
}
