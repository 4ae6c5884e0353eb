use std::collections::HashMap;

/*
 * Kubernetes resourceVersion as an orderable token. The API server hands out
 * numeric versions, anything else counts as 0 and therefore never replaces
 * an entry that is already stored.
 */
pub type Version = u64;

pub fn parse_version(resource_version: Option<&str>) -> Version {
    resource_version
	.and_then(|rv| rv.parse::<Version>().ok())
	.unwrap_or(0)
}

/* payload None marks a deleted uid, kept so older updates cannot bring it back */
#[derive(Debug, Clone)]
struct Entry<T> {
    version: Version,
    payload: Option<T>,
}

/*
 * SnapshotMap is the per-collection mirror, keyed by uid. Versions stored for
 * a uid never go backwards:
 *
 *  - an update carrying a version lower or equal to the stored one is discarded
 *  - a delete carrying a version lower than the stored one is discarded
 *  - a deleted uid leaves a tombstone at its last version behind
 *
 * Not synchronized, the owning cache keeps it behind its collection lock.
 */
#[derive(Debug)]
pub struct SnapshotMap<T> {
    entries: HashMap<String, Entry<T>>,
}

impl<T: Clone> SnapshotMap<T> {

    pub fn new() -> Self {
	Self{
	    entries: HashMap::new(),
	}
    }

    /*
     * Returns true if the map was updated, false otherwise.
     */
    pub fn put_if_newer(&mut self, uid: &str, version: Version, payload: T) -> bool {
	if let Some(current) = self.entries.get(uid) {
	    if version <= current.version {
		return false;
	    }
	}
	self.entries.insert(uid.to_string(), Entry{ version: version, payload: Some(payload) });
	true
    }

    /*
     * Returns true if a live entry was removed. A delete may carry the same
     * version as the object it deletes.
     */
    pub fn remove(&mut self, uid: &str, version: Version) -> bool {
	let entry = self.entries.entry(uid.to_string()).or_insert(Entry{ version: version, payload: None });
	if version < entry.version {
	    return false;
	}

	entry.version = version;
	entry.payload.take().is_some()
    }

    pub fn get(&self, uid: &str) -> Option<T> {
	self.entries.get(uid).and_then(|entry| entry.payload.clone())
    }

    #[cfg(test)]
    pub fn version(&self, uid: &str) -> Option<Version> {
	self.entries.get(uid).map(|entry| entry.version)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
	self.entries.values().filter(|entry| entry.payload.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn newer_versions_replace_older_ones() {
	let mut map = SnapshotMap::new();

	assert!(map.put_if_newer("a", 3, "v3"));
	assert!(map.put_if_newer("a", 7, "v7"));

	assert_eq!(map.get("a"), Some("v7"));
	assert_eq!(map.version("a"), Some(7));
    }

    #[test]
    fn stale_and_duplicate_versions_are_ignored() {
	let mut map = SnapshotMap::new();
	map.put_if_newer("a", 5, "v5");

	assert!(!map.put_if_newer("a", 5, "again"));
	assert!(!map.put_if_newer("a", 4, "v4"));
	assert_eq!(map.get("a"), Some("v5"));
    }

    #[test]
    fn remove_reports_whether_something_changed() {
	let mut map = SnapshotMap::new();
	map.put_if_newer("a", 1, "v1");

	assert!(map.remove("a", 1));
	assert!(!map.remove("a", 2));
	assert_eq!(map.len(), 0);
	assert_eq!(map.get("a"), None);
    }

    #[test]
    fn stale_delete_is_ignored() {
	let mut map = SnapshotMap::new();
	map.put_if_newer("a", 7, "v7");

	assert!(!map.remove("a", 3));
	assert_eq!(map.get("a"), Some("v7"));
	assert_eq!(map.version("a"), Some(7));
    }

    #[test]
    fn deleted_uid_cannot_be_resurrected_by_older_updates() {
	let mut map = SnapshotMap::new();
	map.put_if_newer("a", 7, "v7");
	assert!(map.remove("a", 8));

	assert!(!map.put_if_newer("a", 5, "v5"));
	assert!(!map.put_if_newer("a", 8, "v8"));
	assert_eq!(map.get("a"), None);

	// an unknown uid deleted first still blocks older adds
	assert!(!map.remove("b", 4));
	assert!(!map.put_if_newer("b", 2, "v2"));
	assert!(map.put_if_newer("b", 9, "v9"));
    }

    #[test]
    fn unparsable_versions_count_as_zero() {
	assert_eq!(parse_version(Some("1234")), 1234);
	assert_eq!(parse_version(Some("abc")), 0);
	assert_eq!(parse_version(None), 0);
    }
}
