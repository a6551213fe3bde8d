//! Background sweep for hung agents

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{AgentPool, PoolInner};

/// Periodically force-destroys agents stuck in `running`.
///
/// The monitor holds only a weak reference, so it stops on its own once
/// every pool handle is dropped. Dropping the monitor stops it as well.
pub struct HealthMonitor {
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub(super) fn spawn(pool: Weak<PoolInner>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(inner) = pool.upgrade() else {
                    tracing::debug!("Agent pool dropped, stopping health monitor");
                    break;
                };
                let swept = AgentPool { inner }.sweep_hung_agents().await;
                if !swept.is_empty() {
                    tracing::warn!(count = swept.len(), "Health monitor destroyed hung agents");
                }
            }
        });

        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
