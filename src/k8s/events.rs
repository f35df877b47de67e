/// Background tailing of cluster-wide Kubernetes events
use anyhow::Result;
use chrono::SecondsFormat;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Logs events whose name or involved object contains a filter substring
pub struct EventLogger {
    api: Api<Event>,
    filter: String,
}

impl EventLogger {
    pub fn new(client: Client, filter: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            filter: filter.into(),
        }
    }

    /// Run on a separate task until the token is cancelled
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(cancel).await {
                warn!("Event logging stopped: {:#}", e);
            }
        })
    }

    /// Tail events until cancelled or the feed ends
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("Watching Kubernetes events matching '{}'", self.filter);

        let mut events = watcher(self.api, watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .boxed();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Event logging cancelled");
                    return Ok(());
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        if matches_filter(&event, &self.filter) {
                            info!("EVENT: {}", format_event(&event));
                        }
                    }
                    Some(Err(e)) => warn!("Event watch error: {}", e),
                    None => anyhow::bail!("event feed closed"),
                },
            }
        }
    }
}

/// True if the event name or its involved object name contains `filter`
pub fn matches_filter(event: &Event, filter: &str) -> bool {
    if filter.is_empty() {
        return true;
    }

    let involved = event.involved_object.name.as_deref().unwrap_or_default();
    let name = event.metadata.name.as_deref().unwrap_or_default();
    involved.contains(filter) || name.contains(filter)
}

/// Single-line rendering of an event
pub fn format_event(event: &Event) -> String {
    let kind = event.involved_object.kind.as_deref().unwrap_or("Unknown");
    let name = event.involved_object.name.as_deref().unwrap_or("<none>");
    let event_type = event.type_.as_deref().unwrap_or("Normal");
    let reason = event.reason.as_deref().unwrap_or("-");
    let message = event.message.as_deref().unwrap_or("").trim();

    let timestamp = event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));

    match timestamp {
        Some(ts) => format!(
            "[{}] {}/{} {}: {} ({})",
            event_type, kind, name, reason, message, ts
        ),
        None => format!("[{}] {}/{} {}: {}", event_type, kind, name, reason, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn event(name: &str, involved: &str) -> Event {
        Event {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some(involved.to_string()),
                ..ObjectReference::default()
            },
            reason: Some("Scheduled".to_string()),
            message: Some("Successfully assigned pod\n".to_string()),
            type_: Some("Normal".to_string()),
            ..Event::default()
        }
    }

    #[test]
    fn test_filter_matches_involved_object() {
        let ev = event("abc.17a", "seldon-model-example-0-classifier-7d9f");
        assert!(matches_filter(&ev, "seldon-model"));
        assert!(!matches_filter(&ev, "other-model"));
    }

    #[test]
    fn test_filter_matches_event_name() {
        let ev = event("seldon-model.17a", "unrelated");
        assert!(matches_filter(&ev, "seldon-model"));
        assert!(matches_filter(&ev, ""));
    }

    #[test]
    fn test_format_event() {
        let mut ev = event("seldon-model.17a", "seldon-model-pod");
        assert_eq!(
            format_event(&ev),
            "[Normal] Pod/seldon-model-pod Scheduled: Successfully assigned pod"
        );

        let scheduled = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        ev.last_timestamp = Some(Time(scheduled));
        assert_eq!(
            format_event(&ev),
            "[Normal] Pod/seldon-model-pod Scheduled: Successfully assigned pod (2024-05-01T12:30:00Z)"
        );
    }
}
