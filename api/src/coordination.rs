use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/* The port every agent serves its coordination endpoint on */
pub const AGENT_PORT: u16 = 42699;

/* GET returns a CoordinationRecord */
pub const COORDINATION_PATH: &str = "/coordination";

/* PUT takes the list of resources the agent is assigned to */
pub const ASSIGNED_PATH: &str = "/coordination/assigned";

/*
 * A resource is a named monitoring responsibility, e.g. the kubernetes
 * cluster itself, that must be handled by exactly one agent.
 */
pub type ResourceName = String;

/*
 * The document an agent hands out when polled.
 *
 *   {"requested": ["k8s"], "assigned": []}
 *
 * Agents report `null` for empty lists, those decode as empty sets.
 */
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationRecord {

    // resources this agent is willing to take over
    #[serde(default, deserialize_with = "nullable_set")]
    pub requested: BTreeSet<ResourceName>,

    // resources this agent believes it currently holds
    #[serde(default, deserialize_with = "nullable_set")]
    pub assigned: BTreeSet<ResourceName>,
}

fn nullable_set<'de, D>(deserializer: D) -> Result<BTreeSet<ResourceName>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let set: Option<BTreeSet<ResourceName>> = Option::deserialize(deserializer)?;
    Ok(set.unwrap_or_default())
}

impl CoordinationRecord {

    pub fn new<R, A>(requested: R, assigned: A) -> Self
    where
	R: IntoIterator,
	R::Item: Into<ResourceName>,
	A: IntoIterator,
	A::Item: Into<ResourceName>,
    {
	Self{
	    requested: requested.into_iter().map(Into::into).collect(),
	    assigned: assigned.into_iter().map(Into::into).collect(),
	}
    }

    pub fn requests(&self, resource: &str) -> bool {
	self.requested.contains(resource)
    }

    pub fn holds(&self, resource: &str) -> bool {
	self.assigned.contains(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn decodes_agent_document() {
	let record: CoordinationRecord = serde_json::from_str(r#"{"requested":["k8s","etcd"],"assigned":["k8s"]}"#).unwrap();

	assert_eq!(record, CoordinationRecord::new(["etcd", "k8s"], ["k8s"]));
	assert!(record.requests("etcd"));
	assert!(record.holds("k8s"));
	assert!(!record.holds("etcd"));
    }

    #[test]
    fn null_and_missing_lists_are_empty() {
	let record: CoordinationRecord = serde_json::from_str(r#"{"requested":null}"#).unwrap();

	assert!(record.requested.is_empty());
	assert!(record.assigned.is_empty());
    }

    #[test]
    fn encodes_both_lists() {
	let record = CoordinationRecord::new(["k8s"], Vec::<String>::new());

	assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"requested":["k8s"],"assigned":[]}"#);
    }
}
