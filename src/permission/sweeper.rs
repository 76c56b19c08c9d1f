//! Background safety net for requests nobody cleaned up.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::PermissionArbiter;

/// Run [`PermissionArbiter::sweep_expired`] every `sweep_interval` until
/// `cancel` fires or the arbiter is dropped.
pub fn spawn_sweeper(arbiter: &Arc<PermissionArbiter>, cancel: CancellationToken) -> JoinHandle<()> {
    let weak: Weak<PermissionArbiter> = Arc::downgrade(arbiter);
    let period = arbiter.config().sweep_interval();
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(arbiter) = weak.upgrade() else { break };
                    let swept = arbiter.sweep_expired();
                    if swept > 0 {
                        tracing::debug!(swept, "permission sweep");
                    }
                }
            }
        }
        tracing::debug!("permission sweeper stopped");
    })
}
