/// SeldonDeployment collection access
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::debug;

use crate::convergence::ChangeEvent;
use crate::seldon::SeldonDeployment;

/// Failures reported by the store, classified for the waiters
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("seldon deployment {name} not found")]
    NotFound { name: String },

    #[error("kubernetes API request failed")]
    Api(#[source] kube::Error),

    #[error("change feed failed: {0}")]
    Feed(Box<dyn std::error::Error + Send + Sync>),

    #[error("change feed closed")]
    FeedClosed,
}

impl StoreError {
    /// Classify a kube error, mapping 404 to `NotFound`
    pub fn from_kube(err: kube::Error, name: &str) -> Self {
        match err {
            kube::Error::Api(ref e) if e.code == 404 => StoreError::NotFound {
                name: name.to_string(),
            },
            other => StoreError::Api(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Stream of decoded change events for a collection
pub type ChangeFeed<K> = BoxStream<'static, Result<ChangeEvent<K>, StoreError>>;

/// Operations the lifecycle needs from the deployment collection
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Namespace every operation is scoped to
    fn namespace(&self) -> &str;

    async fn create(&self, dpl: &SeldonDeployment) -> Result<SeldonDeployment, StoreError>;

    async fn get(&self, name: &str) -> Result<SeldonDeployment, StoreError>;

    async fn replace(&self, dpl: &SeldonDeployment) -> Result<SeldonDeployment, StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Open a subscription to the collection's change feed
    async fn watch(&self) -> Result<ChangeFeed<SeldonDeployment>, StoreError>;
}

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeDeploymentStore {
    api: Api<SeldonDeployment>,
    namespace: String,
}

impl KubeDeploymentStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            api: Api::namespaced(client, &namespace),
            namespace,
        }
    }
}

#[async_trait]
impl DeploymentStore for KubeDeploymentStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create(&self, dpl: &SeldonDeployment) -> Result<SeldonDeployment, StoreError> {
        let name = dpl.name_any();
        debug!("POST seldondeployments/{}", name);
        self.api
            .create(&PostParams::default(), dpl)
            .await
            .map_err(|e| StoreError::from_kube(e, &name))
    }

    async fn get(&self, name: &str) -> Result<SeldonDeployment, StoreError> {
        debug!("GET seldondeployments/{}", name);
        self.api
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, name))
    }

    async fn replace(&self, dpl: &SeldonDeployment) -> Result<SeldonDeployment, StoreError> {
        let name = dpl.name_any();
        debug!("PUT seldondeployments/{}", name);
        self.api
            .replace(&name, &PostParams::default(), dpl)
            .await
            .map_err(|e| StoreError::from_kube(e, &name))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        debug!("DELETE seldondeployments/{}", name);
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, name))
    }

    async fn watch(&self) -> Result<ChangeFeed<SeldonDeployment>, StoreError> {
        debug!("WATCH seldondeployments in {}", self.namespace);
        // watcher() connects lazily, so probe the collection to fail the open itself
        self.api
            .list_metadata(&kube::api::ListParams::default().limit(1))
            .await
            .map_err(StoreError::Api)?;

        let feed = watcher(self.api.clone(), watcher::Config::default())
            .map_ok(ChangeEvent::from)
            .map_err(|e| StoreError::Feed(Box::new(e)))
            .boxed();
        Ok(feed)
    }
}
