/// Absence-polling: fetch the target until the store reports it gone
use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ObservedState, WaitError, WatchTarget};
use crate::k8s::StoreError;
use crate::utils::PollingConfig;

/// Fetch `target` every `polling.interval` until a fetch reports not-found.
///
/// Any other fetch error ends the wait immediately as `Transport`; it is not
/// retried. Unbounded unless `polling.timeout` is set.
pub async fn wait_until_absent<K, F, Fut>(
    target: &WatchTarget,
    polling: &PollingConfig,
    cancel: &CancellationToken,
    fetch: F,
) -> Result<(), WaitError>
where
    K: ObservedState,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<K, StoreError>>,
{
    if polling.interval.is_zero() {
        return Err(WaitError::InvalidTarget(
            "polling interval must be greater than zero".to_string(),
        ));
    }

    polling
        .poll_until(cancel, || async {
            match fetch().await {
                Ok(obj) => {
                    info!(
                        "{} not yet deleted (status {}), waiting for deletion...",
                        target,
                        obj.state_summary()
                    );
                    Ok(false)
                }
                Err(e) if e.is_not_found() => Ok(true),
                Err(source) => Err(WaitError::Transport {
                    target: target.to_string(),
                    source,
                }),
            }
        })
        .await
}
