//! The namespace repository collaborator. Everything the operator does to
//! the cluster goes through [`NamespaceStore`], so the aggregator, the
//! deletion engine and the reconciliation loop can be exercised against an
//! in-memory fake.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("namespace not found")]
    NotFound,
    #[error("request timed out")]
    Timeout,
    #[error("kubernetes api error: {0}")]
    Api(#[source] kube::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("watch stream error: {0}")]
    Watch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Applied,
    Deleted,
}

/// One namespace change event from the watch stream.
#[derive(Debug, Clone)]
pub struct NamespaceEvent {
    pub kind: EventKind,
    pub namespace: Namespace,
}

pub type EventStream = BoxStream<'static, Result<NamespaceEvent, StoreError>>;

#[async_trait]
pub trait NamespaceStore: Send + Sync {
    async fn list(&self, selector: &str)
    -> Result<Vec<Namespace>, StoreError>;

    /// `Ok(None)` means the namespace does not exist.
    async fn get(&self, name: &str) -> Result<Option<Namespace>, StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Submit a namespace record with cleared finalizer lists through the
    /// `finalize` subresource.
    async fn finalize(&self, namespace: Namespace) -> Result<(), StoreError>;

    async fn watch(&self, selector: &str) -> Result<EventStream, StoreError>;
}

fn map_kube_err(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
        other => StoreError::Api(other),
    }
}

/// Production store backed by the cluster-scoped namespace API.
#[derive(Clone)]
pub struct KubeNamespaceStore {
    api: Api<Namespace>,
}

impl KubeNamespaceStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NamespaceStore for KubeNamespaceStore {
    async fn list(
        &self,
        selector: &str,
    ) -> Result<Vec<Namespace>, StoreError> {
        let params = ListParams::default().labels(selector);
        let listed = self.api.list(&params).await.map_err(map_kube_err)?;
        Ok(listed.items)
    }

    async fn get(&self, name: &str) -> Result<Option<Namespace>, StoreError> {
        self.api.get_opt(name).await.map_err(map_kube_err)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(map_kube_err)
    }

    async fn finalize(&self, namespace: Namespace) -> Result<(), StoreError> {
        let name = namespace.name_any();
        let data = serde_json::to_vec(&namespace)?;
        self.api
            .replace_subresource(
                "finalize",
                &name,
                &PostParams::default(),
                data,
            )
            .await
            .map(|_| ())
            .map_err(map_kube_err)
    }

    async fn watch(&self, selector: &str) -> Result<EventStream, StoreError> {
        let cfg = watcher::Config::default().labels(selector);
        let stream = watcher::watcher(self.api.clone(), cfg)
            .filter_map(|res| async move {
                match res {
                    // InitApply re-delivery is idempotent for the loop, so
                    // relists after desync heal missed events.
                    Ok(watcher::Event::Apply(ns))
                    | Ok(watcher::Event::InitApply(ns)) => {
                        Some(Ok(NamespaceEvent {
                            kind: EventKind::Applied,
                            namespace: ns,
                        }))
                    }
                    Ok(watcher::Event::Delete(ns)) => Some(Ok(NamespaceEvent {
                        kind: EventKind::Deleted,
                        namespace: ns,
                    })),
                    Ok(watcher::Event::Init)
                    | Ok(watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(StoreError::Watch(e.to_string()))),
                }
            })
            .boxed();
        Ok(stream)
    }
}
