/// SeldonDeployment resource handling
pub mod manager;
pub mod manifest;
pub mod models;

pub use manager::{DeploymentManager, LifecyclePlan, WaitSettings};
pub use models::SeldonDeployment;
