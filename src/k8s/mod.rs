/// Kubernetes API access
pub mod client;
pub mod events;
pub mod store;

pub use client::KubernetesClient;
pub use events::EventLogger;
pub use store::{DeploymentStore, KubeDeploymentStore, StoreError};
