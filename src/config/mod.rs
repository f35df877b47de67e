/// Configuration management for the seldon lifecycle driver
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default kubeconfig location relative to the home directory
const DEFAULT_KUBECONFIG: &str = ".kube/config";

/// Lifecycle run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Namespace the seldon deployment lives in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Deadline for each watch-until-ready step
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Interval between fetches while waiting for deletion
    #[serde(default = "default_poll_interval")]
    pub deletion_poll_interval_secs: u64,

    /// Upper bound on the deletion wait (unbounded when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timeout_secs: Option<u64>,

    /// Replica count expected after creation
    #[serde(default = "default_initial_replicas")]
    pub initial_replicas: i32,

    /// Replica count the deployment is scaled to
    #[serde(default = "default_scaled_replicas")]
    pub scaled_replicas: i32,

    /// Kubernetes event logging
    #[serde(default)]
    pub events: EventsConfig,
}

/// Kubernetes event tailing configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Tail cluster events in the background
    #[serde(default)]
    pub enabled: bool,

    /// Substring an event's name or involved object must contain.
    /// Defaults to the deployment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_operation_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    3
}

fn default_initial_replicas() -> i32 {
    1
}

fn default_scaled_replicas() -> i32 {
    2
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            operation_timeout_secs: default_operation_timeout(),
            deletion_poll_interval_secs: default_poll_interval(),
            deletion_timeout_secs: None,
            initial_replicas: default_initial_replicas(),
            scaled_replicas: default_scaled_replicas(),
            events: EventsConfig::default(),
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LifecycleConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional settings file, falling back to defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if self.operation_timeout_secs == 0 {
            anyhow::bail!("operation_timeout_secs must be greater than zero");
        }

        if self.deletion_poll_interval_secs == 0 {
            anyhow::bail!("deletion_poll_interval_secs must be greater than zero");
        }

        if self.deletion_timeout_secs == Some(0) {
            anyhow::bail!("deletion_timeout_secs must be greater than zero when set");
        }

        if self.initial_replicas < 0 || self.scaled_replicas < 0 {
            anyhow::bail!("replica counts cannot be negative");
        }

        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn deletion_poll_interval(&self) -> Duration {
        Duration::from_secs(self.deletion_poll_interval_secs)
    }

    pub fn deletion_timeout(&self) -> Option<Duration> {
        self.deletion_timeout_secs.map(Duration::from_secs)
    }

    /// Generate an example configuration file
    pub fn example() -> Self {
        Self {
            deletion_timeout_secs: Some(300),
            events: EventsConfig {
                enabled: true,
                filter: Some("seldon-model".to_string()),
            },
            ..Self::default()
        }
    }
}

/// Resolve the kubeconfig path from an explicit flag, `KUBECONFIG`, or `~/.kube/config`
pub fn kubeconfig_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    resolve_kubeconfig(
        explicit,
        std::env::var("KUBECONFIG").ok(),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn resolve_kubeconfig(
    explicit: Option<&Path>,
    env: Option<String>,
    home: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(env) = env.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(env));
    }

    match home {
        Some(home) => Ok(home.join(DEFAULT_KUBECONFIG)),
        None => anyhow::bail!("Kubeconfig not found. Set KUBECONFIG or pass --kubeconfig"),
    }
}
