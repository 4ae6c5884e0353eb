use crate::errors::Error;
use crate::errors::Result;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use kube::Api as KubeApi;
use kube::Resource;
use kube::ResourceExt;
use kube::api::ListParams as KubeListParams;
use kube::api::WatchEvent as KubeWatchEvent;
use kube::api::WatchParams as KubeWatchParams;
use log;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/* the api server closes watches after this many seconds, we then re-open them */
const WATCH_TIMEOUT_SECS: u32 = 290;

/* A full list of the collection plus the version to start watching from */
pub struct Listing<K> {
    pub items: Vec<K>,
    pub resource_version: Option<String>,
}

#[derive(Debug)]
pub enum WatchNotification<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

/*
 * A live stream of changes. The stream ending without an error means the
 * watch was closed on purpose, an Err item means it broke.
 */
pub type WatchStream<K> = BoxStream<'static, Result<WatchNotification<K>>>;

/*
 * A ListerWatcher can list() and watch() one collection.
 */
#[async_trait]
pub trait ListerWatcher<K>: Send + Sync {
    async fn list(&self) -> Result<Listing<K>>;

    async fn watch(&self, resource_version: Option<String>) -> Result<WatchStream<K>>;
}

/*
 * KubeListerWatcher lists and watches a kubernetes collection, optionally
 * restricted by a label and/or a field selector.
 */
pub struct KubeListerWatcher<K> {
    api: KubeApi<K>,
    label_selector: Option<String>,
    field_selector: Option<String>,
}

impl<K> KubeListerWatcher<K> {

    pub fn new(api: KubeApi<K>, label_selector: Option<String>) -> Self {
	Self{
	    api: api,
	    label_selector: label_selector,
	    field_selector: None,
	}
    }

    pub fn with_fields(mut self, field_selector: &str) -> Self {
	self.field_selector = Some(field_selector.to_string());
	self
    }

    fn list_params(&self) -> KubeListParams {
	let mut params = KubeListParams::default();
	if let Some(selector) = &self.label_selector {
	    params = params.labels(selector);
	}
	if let Some(selector) = &self.field_selector {
	    params = params.fields(selector);
	}
	params
    }

    fn watch_params(&self) -> KubeWatchParams {
	let mut params = KubeWatchParams::default().timeout(WATCH_TIMEOUT_SECS);
	if let Some(selector) = &self.label_selector {
	    params = params.labels(selector);
	}
	if let Some(selector) = &self.field_selector {
	    params = params.fields(selector);
	}
	params
    }
}

#[async_trait]
impl<K> ListerWatcher<K> for KubeListerWatcher<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self) -> Result<Listing<K>> {
	let list = self.api.list(&self.list_params()).await?;

	Ok(Listing{
	    items: list.items,
	    resource_version: list.metadata.resource_version,
	})
    }

    /*
     * The api server ends every watch after its timeout. Such a close carries
     * no error, so the watch is re-opened from the last version seen. An
     * Error event (e.g. 410 Gone) cannot be resumed and ends the stream with
     * an error.
     */
    async fn watch(&self, resource_version: Option<String>) -> Result<WatchStream<K>> {
	let api = self.api.clone();
	let params = self.watch_params();
	let mut version = resource_version.unwrap_or_else(|| String::from("0"));

	let notifications = stream! {
	    loop {
		let events = match api.watch(&params, &version).await {
		    Ok(events) => events,
		    Err(err) => {
			yield Err(Error::Kube(err));
			return;
		    }
		};
		futures::pin_mut!(events);

		loop {
		    let event = match events.try_next().await {
			Ok(Some(event)) => event,
			Ok(None) => break,
			Err(err) => {
			    yield Err(Error::Kube(err));
			    return;
			}
		    };

		    match event {
			KubeWatchEvent::Added(obj) => {
			    remember_version(&mut version, &obj);
			    yield Ok(WatchNotification::Added(obj));
			},
			KubeWatchEvent::Modified(obj) => {
			    remember_version(&mut version, &obj);
			    yield Ok(WatchNotification::Modified(obj));
			},
			KubeWatchEvent::Deleted(obj) => {
			    remember_version(&mut version, &obj);
			    yield Ok(WatchNotification::Deleted(obj));
			},
			KubeWatchEvent::Bookmark(bookmark) => {
			    version = bookmark.metadata.resource_version;
			},
			KubeWatchEvent::Error(err) => {
			    yield Err(Error::Watch(format!("watch failed with {} {}: {}", err.code, err.reason, err.message)));
			    return;
			},
		    }
		}

		log::debug!("Watch closed by the api server, resuming from resource version {}", version);
	    }
	};

	Ok(Box::pin(notifications))
    }
}

fn remember_version<K: Resource>(version: &mut String, obj: &K) {
    if let Some(rv) = obj.resource_version() {
	*version = rv;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use similar_asserts::assert_eq;

    fn lister(selector: Option<&str>) -> KubeListerWatcher<Pod> {
	let config = kube::Config::new("http://localhost:8080".parse().unwrap());
	let client = kube::Client::try_from(config).unwrap();
	KubeListerWatcher::new(KubeApi::namespaced(client, "instana-agent"), selector.map(String::from))
    }

    #[tokio::test]
    async fn selector_is_applied_to_list_and_watch() {
	let lw = lister(Some("app.kubernetes.io/name=instana-agent"));

	assert_eq!(lw.list_params().label_selector.as_deref(), Some("app.kubernetes.io/name=instana-agent"));
	assert_eq!(lw.watch_params().label_selector.as_deref(), Some("app.kubernetes.io/name=instana-agent"));
	assert_eq!(lw.watch_params().timeout, Some(WATCH_TIMEOUT_SECS));
    }

    #[tokio::test]
    async fn no_selector_watches_everything() {
	let lw = lister(None);

	assert_eq!(lw.list_params().label_selector, None);
	assert_eq!(lw.watch_params().label_selector, None);
	assert_eq!(lw.list_params().field_selector, None);
    }

    #[tokio::test]
    async fn field_selector_narrows_to_one_object() {
	let lw = lister(None).with_fields("metadata.name=instana-agent");

	assert_eq!(lw.list_params().field_selector.as_deref(), Some("metadata.name=instana-agent"));
	assert_eq!(lw.watch_params().field_selector.as_deref(), Some("metadata.name=instana-agent"));
	assert_eq!(lw.list_params().label_selector, None);
    }
}
