/// Seldon deployment lifecycle operations
use anyhow::{Context, Result};
use kube::ResourceExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::models::{has_ready_replicas, SeldonDeployment};
use crate::config::LifecycleConfig;
use crate::convergence::{wait_for_event, wait_until_absent, WaitError, WatchTarget};
use crate::k8s::DeploymentStore;
use crate::utils::PollingConfig;

/// Timing used by the convergence waits
#[derive(Debug, Clone)]
pub struct WaitSettings {
    pub operation_timeout: Duration,
    pub poll_interval: Duration,
    pub deletion_timeout: Option<Duration>,
}

impl From<&LifecycleConfig> for WaitSettings {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout(),
            poll_interval: config.deletion_poll_interval(),
            deletion_timeout: config.deletion_timeout(),
        }
    }
}

/// Replica counts for the create and scale steps
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePlan {
    pub initial_replicas: i32,
    pub scaled_replicas: i32,
}

impl From<&LifecycleConfig> for LifecyclePlan {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            initial_replicas: config.initial_replicas,
            scaled_replicas: config.scaled_replicas,
        }
    }
}

/// Drives a seldon deployment through its lifecycle
pub struct DeploymentManager<S> {
    store: S,
    settings: WaitSettings,
    cancel: CancellationToken,
}

impl<S: DeploymentStore> DeploymentManager<S> {
    /// Create a new deployment manager
    pub fn new(store: S, settings: WaitSettings, cancel: CancellationToken) -> Self {
        Self {
            store,
            settings,
            cancel,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the seldon deployment
    pub async fn create_deployment(&self, dpl: &SeldonDeployment) -> Result<()> {
        let created = self
            .store
            .create(dpl)
            .await
            .with_context(|| {
                format!("Failed to create seldon deployment {}", dpl.name_any())
            })?;

        info!("ACTION: Creating seldon deployment: {}", created.name_any());
        Ok(())
    }

    /// Set the replica count of the first predictor
    pub async fn update_deployment_replicas(&self, name: &str, replicas: i32) -> Result<()> {
        let mut dpl = self
            .store
            .get(name)
            .await
            .with_context(|| format!("Failed to get seldon deployment {}", name))?;

        dpl.set_replicas(replicas).with_context(|| {
            format!("Seldon deployment {} has no predictors to scale", name)
        })?;

        self.store
            .replace(&dpl)
            .await
            .with_context(|| format!("Failed to update seldon deployment {}", name))?;

        info!(
            "ACTION: Updating seldon deployment replicas to: {}, {}",
            name, replicas
        );
        Ok(())
    }

    /// Delete the seldon deployment
    pub async fn delete_deployment(&self, name: &str) -> Result<()> {
        self.store
            .delete(name)
            .await
            .with_context(|| format!("Failed to delete seldon deployment {}", name))?;

        info!("ACTION: Deleting seldon deployment: {}", name);
        Ok(())
    }

    /// Watch until the deployment is Available with exactly `replicas` ready
    pub async fn wait_for_ready_replicas(
        &self,
        name: &str,
        replicas: i32,
    ) -> Result<SeldonDeployment> {
        let target = WatchTarget::new(name, self.store.namespace())?;

        let mut feed = self
            .store
            .watch()
            .await
            .map_err(|source| WaitError::Transport {
                target: target.to_string(),
                source,
            })?;

        let dpl = wait_for_event(
            &mut feed,
            &target,
            has_ready_replicas(replicas),
            self.settings.operation_timeout,
            &self.cancel,
        )
        .await?;

        info!(
            "----- ✓ Successfully waited for deployment ({}) to have {} ready replicas -----",
            name, replicas
        );
        Ok(dpl)
    }

    /// Poll until the deployment no longer exists
    pub async fn wait_for_deleted(&self, name: &str) -> Result<()> {
        let target = WatchTarget::new(name, self.store.namespace())?;
        let polling = PollingConfig::new(
            self.settings.poll_interval,
            format!("Waiting for deployment ({}) to finish deletion", name),
        )
        .with_timeout(self.settings.deletion_timeout);

        wait_until_absent(&target, &polling, &self.cancel, || self.store.get(name)).await?;

        info!(
            "----- ✓ Deployment ({}) successfully finished deletion -----",
            name
        );
        Ok(())
    }

    /// Create, wait, scale, wait, delete, wait; stops at the first failure
    pub async fn run_lifecycle(&self, dpl: &SeldonDeployment, plan: LifecyclePlan) -> Result<()> {
        let name = dpl.name_any();

        self.create_deployment(dpl).await?;
        self.wait_for_ready_replicas(&name, plan.initial_replicas)
            .await?;
        self.update_deployment_replicas(&name, plan.scaled_replicas)
            .await?;
        self.wait_for_ready_replicas(&name, plan.scaled_replicas)
            .await?;
        self.delete_deployment(&name).await?;
        self.wait_for_deleted(&name).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::{stream, StreamExt};

    use super::*;
    use crate::convergence::ChangeEvent;
    use crate::k8s::store::ChangeFeed;
    use crate::k8s::StoreError;
    use crate::seldon::manifest;
    use crate::seldon::models::fixtures::observed;
    use crate::seldon::models::StatusState;

    /// In-memory store handing out scripted change feeds
    #[derive(Default)]
    struct MockStore {
        objects: Mutex<BTreeMap<String, SeldonDeployment>>,
        feeds: Mutex<VecDeque<ChangeFeed<SeldonDeployment>>>,
        actions: Mutex<Vec<String>>,
    }

    impl MockStore {
        fn with_feeds(feeds: Vec<Vec<ChangeEvent<SeldonDeployment>>>) -> Self {
            let store = Self::default();
            *store.feeds.lock().unwrap() = feeds
                .into_iter()
                .map(|events| {
                    stream::iter(events.into_iter().map(Ok::<_, StoreError>))
                        .chain(stream::pending())
                        .boxed()
                })
                .collect();
            store
        }

        fn record(&self, action: impl Into<String>) {
            self.actions.lock().unwrap().push(action.into());
        }

        fn actions(&self) -> Vec<String> {
            self.actions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeploymentStore for MockStore {
        fn namespace(&self) -> &str {
            "default"
        }

        async fn create(&self, dpl: &SeldonDeployment) -> Result<SeldonDeployment, StoreError> {
            self.record(format!("create {}", dpl.name_any()));
            self.objects
                .lock()
                .unwrap()
                .insert(dpl.name_any(), dpl.clone());
            Ok(dpl.clone())
        }

        async fn get(&self, name: &str) -> Result<SeldonDeployment, StoreError> {
            self.record(format!("get {}", name));
            self.objects
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    name: name.to_string(),
                })
        }

        async fn replace(&self, dpl: &SeldonDeployment) -> Result<SeldonDeployment, StoreError> {
            let replicas = dpl.spec.predictors.first().and_then(|p| p.replicas);
            self.record(format!(
                "replace {} replicas={:?}",
                dpl.name_any(),
                replicas
            ));
            self.objects
                .lock()
                .unwrap()
                .insert(dpl.name_any(), dpl.clone());
            Ok(dpl.clone())
        }

        async fn delete(&self, name: &str) -> Result<(), StoreError> {
            self.record(format!("delete {}", name));
            self.objects
                .lock()
                .unwrap()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound {
                    name: name.to_string(),
                })
        }

        async fn watch(&self) -> Result<ChangeFeed<SeldonDeployment>, StoreError> {
            self.record("watch");
            self.feeds
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| StoreError::Feed("watch refused".into()))
        }
    }

    fn settings() -> WaitSettings {
        WaitSettings {
            operation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(3),
            deletion_timeout: None,
        }
    }

    fn plan() -> LifecyclePlan {
        LifecyclePlan {
            initial_replicas: 1,
            scaled_replicas: 2,
        }
    }

    fn deployment() -> SeldonDeployment {
        let doc = include_str!("../../testdata/seldon-deployment.json");
        manifest::parse(doc, manifest::ManifestFormat::Json).unwrap()
    }

    fn applied(state: StatusState, ready: &[i32]) -> ChangeEvent<SeldonDeployment> {
        ChangeEvent::Applied(observed("seldon-model", Some(state), ready))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle() {
        let store = MockStore::with_feeds(vec![
            vec![
                applied(StatusState::Creating, &[0]),
                applied(StatusState::Available, &[1]),
            ],
            vec![
                applied(StatusState::Available, &[1]),
                applied(StatusState::Creating, &[1]),
                applied(StatusState::Available, &[2]),
            ],
        ]);
        let manager = DeploymentManager::new(store, settings(), CancellationToken::new());

        tokio_test::assert_ok!(manager.run_lifecycle(&deployment(), plan()).await);

        assert_eq!(
            manager.store().actions(),
            vec![
                "create seldon-model",
                "watch",
                "get seldon-model",
                "replace seldon-model replicas=Some(2)",
                "watch",
                "delete seldon-model",
                "get seldon-model",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scaled_wait_requires_new_ready_count() {
        let store = MockStore::with_feeds(vec![vec![
            applied(StatusState::Available, &[1]),
            applied(StatusState::Available, &[1, 1]),
        ]]);
        let manager = DeploymentManager::new(store, settings(), CancellationToken::new());

        let dpl = manager
            .wait_for_ready_replicas("seldon-model", 2)
            .await
            .unwrap();
        assert_eq!(dpl.ready_replicas(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_pipeline() {
        let store = MockStore::with_feeds(vec![vec![applied(StatusState::Creating, &[0])]]);
        let manager = DeploymentManager::new(store, settings(), CancellationToken::new());

        let err = manager
            .run_lifecycle(&deployment(), plan())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WaitError>(),
            Some(WaitError::DeadlineExceeded { .. })
        ));
        assert_eq!(
            manager.store().actions(),
            vec!["create seldon-model", "watch"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_open_failure_is_transport_error() {
        let manager =
            DeploymentManager::new(MockStore::default(), settings(), CancellationToken::new());

        let err = manager
            .wait_for_ready_replicas("seldon-model", 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WaitError>(),
            Some(WaitError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_missing_deployment_fails() {
        let manager =
            DeploymentManager::new(MockStore::default(), settings(), CancellationToken::new());

        let err = manager
            .update_deployment_replicas("seldon-model", 2)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound { .. })
        ));
        assert_eq!(manager.store().actions(), vec!["get seldon-model"]);
    }

    #[tokio::test]
    async fn test_update_keeps_unmodeled_fields() {
        let doc = include_str!("../../testdata/seldon-extended.json");
        let store = MockStore::default();
        store.objects.lock().unwrap().insert(
            "seldon-model".to_string(),
            manifest::parse(doc, manifest::ManifestFormat::Json).unwrap(),
        );
        let manager = DeploymentManager::new(store, settings(), CancellationToken::new());

        tokio_test::assert_ok!(manager.update_deployment_replicas("seldon-model", 2).await);

        let mut expected: serde_json::Value = serde_json::from_str(doc).unwrap();
        expected["spec"]["predictors"][0]["replicas"] = 2.into();
        let objects = manager.store().objects.lock().unwrap();
        let encoded = serde_json::to_value(&objects["seldon-model"]).unwrap();
        assert_eq!(encoded["spec"], expected["spec"]);
        assert_eq!(
            manager.store().actions(),
            vec!["get seldon-model", "replace seldon-model replicas=Some(2)"]
        );
    }

    #[tokio::test]
    async fn test_update_without_predictors_fails() {
        let store = MockStore::default();
        let mut dpl = deployment();
        dpl.spec.predictors.clear();
        store
            .objects
            .lock()
            .unwrap()
            .insert("seldon-model".to_string(), dpl);
        let manager = DeploymentManager::new(store, settings(), CancellationToken::new());

        let err = manager
            .update_deployment_replicas("seldon-model", 2)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no predictors"));
        assert_eq!(manager.store().actions(), vec!["get seldon-model"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let store = MockStore::with_feeds(vec![vec![]]);
        let cancel = CancellationToken::new();
        let manager = DeploymentManager::new(store, settings(), cancel.clone());
        cancel.cancel();

        let err = manager
            .wait_for_ready_replicas("seldon-model", 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<WaitError>(),
            Some(WaitError::Cancelled { .. })
        ));
    }
}
