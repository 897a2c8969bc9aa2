//! Background timers of the peer manager.
//!
//! Both timers hold only a weak handle on the manager's command queue, so
//! they never keep a manager alive on their own. They stop when the token is
//! cancelled or the manager goes away.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use log::debug;

use crate::network::peer::manager::Command;

/// Start the health sweeper.
///
/// The next sweep is scheduled only once the previous one has finished, so
/// sweeps never overlap however long they take.
pub(crate) fn spawn_health_sweeper(
    commands: mpsc::WeakSender<Command>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(period) => {}
            }

            let Some(tx) = commands.upgrade() else { break };
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(Command::CheckPeers { done: Some(done_tx) }).await.is_err() {
                break;
            }
            drop(tx);

            // Dropped without reply when the manager stops mid-sweep
            if done_rx.await.is_err() {
                break;
            }
        }
        debug!("Health sweeper stopped");
    })
}

/// Start the periodic status reporter
pub(crate) fn spawn_status_reporter(
    commands: mpsc::WeakSender<Command>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(tx) = commands.upgrade() else { break };
            if tx.send(Command::ReportStatus).await.is_err() {
                break;
            }
        }
        debug!("Status reporter stopped");
    })
}
