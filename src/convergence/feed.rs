/// Event-feed convergence: wait for a change event that satisfies a predicate
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ChangeEvent, ObservedState, WaitError, WatchTarget};
use crate::k8s::StoreError;

/// Consume `feed` until an event for `target` satisfies `predicate`.
///
/// Events are evaluated once each, in delivery order. Returns the satisfying
/// object without reading further from the feed. Fails with
/// `DeadlineExceeded` once `timeout` elapses, `Transport` on a feed error or
/// early end of feed, and `Cancelled` when `cancel` fires.
pub async fn wait_for_event<K, S, P>(
    feed: &mut S,
    target: &WatchTarget,
    predicate: P,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<K, WaitError>
where
    K: ObservedState,
    S: Stream<Item = Result<ChangeEvent<K>, StoreError>> + Unpin,
    P: Fn(&K) -> bool,
{
    if timeout.is_zero() {
        return Err(WaitError::InvalidTarget(
            "deadline must be greater than zero".to_string(),
        ));
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled { target: target.to_string() });
            }
            _ = &mut deadline => {
                return Err(WaitError::DeadlineExceeded {
                    target: target.to_string(),
                    timeout,
                });
            }
            next = feed.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(source)) => {
                return Err(WaitError::Transport {
                    target: target.to_string(),
                    source,
                })
            }
            None => {
                return Err(WaitError::Transport {
                    target: target.to_string(),
                    source: StoreError::FeedClosed,
                })
            }
        };

        let label = event.label();
        let obj = match event {
            ChangeEvent::Applied(obj) | ChangeEvent::Deleted(obj) => obj,
            ChangeEvent::Resync => {
                debug!("Change feed resync while waiting for {}", target);
                continue;
            }
        };

        if !target.matches(&obj) {
            debug!("Ignoring {} event for {}", label, obj.display_name());
            continue;
        }

        if predicate(&obj) {
            return Ok(obj);
        }

        info!(
            "Got {} event for {}, current status ({})",
            label,
            target,
            obj.state_summary()
        );
    }
}
