//! Background task that demotes quiescent users.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::engine;
use crate::state::ServerState;

/// How long an ACTIVE user may go without a client-originated action.
pub(crate) const IDLE_LIMIT: Duration = Duration::from_secs(15);

/// How often the sweep runs.
pub(crate) const SWEEP_PERIOD: Duration = Duration::from_secs(3);

/// Sweep the roster every [`SWEEP_PERIOD`] until shutdown.
pub(crate) async fn run(state: Arc<ServerState>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SWEEP_PERIOD);
    loop {
        tokio::select! {
            _ = ticker.tick() => engine::sweep_idle(&state, IDLE_LIMIT),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("idle detector stopping");
                    return;
                }
            }
        }
    }
}
