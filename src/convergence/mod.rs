//! Waiting for a watched object to converge on a desired state.
//!
//! Two strategies are provided. [`wait_for_event`] consumes a push-based
//! change feed and returns as soon as an event for the target satisfies the
//! caller's predicate, or fails once the deadline passes. [`wait_until_absent`]
//! repeatedly fetches the target on a fixed interval and succeeds on the first
//! not-found response, since deletion does not reliably show up on the feed.
//!
//! Every wait ends in exactly one of: success, [`WaitError::DeadlineExceeded`],
//! [`WaitError::Transport`], or [`WaitError::Cancelled`]. Feed handles are
//! owned by the caller's session and dropped on return.
pub mod absence;
pub mod feed;

use std::fmt;
use std::time::Duration;

use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use thiserror::Error;

use crate::k8s::StoreError;

pub use absence::wait_until_absent;
pub use feed::wait_for_event;

/// Identity of the object being waited on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub name: String,
    pub namespace: String,
}

impl WatchTarget {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Result<Self, WaitError> {
        let name = name.into();
        if name.is_empty() {
            return Err(WaitError::InvalidTarget(
                "target name cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            namespace: namespace.into(),
        })
    }

    /// True if `obj` is this target; objects without a namespace match on name alone
    pub fn matches<K: Resource>(&self, obj: &K) -> bool {
        let meta = obj.meta();
        meta.name.as_deref() == Some(self.name.as_str())
            && meta
                .namespace
                .as_deref()
                .map_or(true, |ns| ns == self.namespace)
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("invalid wait: {0}")]
    InvalidTarget(String),

    #[error("{target}: timed out after {}s", .timeout.as_secs())]
    DeadlineExceeded { target: String, timeout: Duration },

    #[error("store failure while waiting for {target}")]
    Transport {
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("{target}: cancelled")]
    Cancelled { target: String },
}

/// One decoded item from a change feed
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<K> {
    /// Object created or modified, or listed during a (re)sync
    Applied(K),
    /// Object removed; carries its last known state
    Deleted(K),
    /// Sync boundary without an object
    Resync,
}

impl<K> ChangeEvent<K> {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeEvent::Applied(_) => "Applied",
            ChangeEvent::Deleted(_) => "Deleted",
            ChangeEvent::Resync => "Resync",
        }
    }
}

impl<K> From<watcher::Event<K>> for ChangeEvent<K> {
    fn from(event: watcher::Event<K>) -> Self {
        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                ChangeEvent::Applied(obj)
            }
            watcher::Event::Delete(obj) => ChangeEvent::Deleted(obj),
            watcher::Event::Init | watcher::Event::InitDone => ChangeEvent::Resync,
        }
    }
}

/// Objects whose state can be summarised in progress lines
pub trait ObservedState: Resource + Sized {
    fn state_summary(&self) -> String;

    fn display_name(&self) -> String {
        self.name_any()
    }
}
