/// Shared utilities
pub mod polling;

pub use polling::PollingConfig;
