/*!
Autosave scheduling.

Autosaves run the regular save pipeline against a ring of rolling slots. The
slot is picked from the wall clock (`unix_ms mod max_backups`), so successive
autosaves overwrite slots in rotation instead of accumulating files.

[`AutosaveController`] owns a tokio task that saves on a fixed interval and
after a debounced context change. Every outcome is broadcast to subscribers so
failures stay observable.
*/

use crate::config::AutosaveConfig;
use crate::manager::SaveManager;
use crate::options::SaveOptions;
use crate::results::SaveResult;
use crate::storage::SlotStorage;
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the outcome channel; slow subscribers observe a lag instead of
/// blocking the task.
const OUTCOME_CAPACITY: usize = 16;

/// Rolling slot for a timestamp in milliseconds
pub fn rotation_index(unix_ms: i64, max_backups: u32) -> u32 {
    let ring = i64::from(max_backups.max(1));
    // rem_euclid keeps the result in 0..ring, so it always fits in u32
    u32::try_from(unix_ms.rem_euclid(ring)).unwrap_or(0)
}

/// Outcome of one autosave
#[derive(Debug, Clone, PartialEq)]
pub struct AutosaveOutcome {
    pub index: u32,
    pub result: SaveResult,
}

/// Run a single autosave into the slot chosen by the current time
pub async fn autosave_once<S: SlotStorage>(
    manager: &SaveManager<S>,
    max_backups: u32,
    options: &SaveOptions,
) -> AutosaveOutcome {
    let index = rotation_index(Utc::now().timestamp_millis(), max_backups);
    let result = manager.save_autosave(index, options).await;
    AutosaveOutcome { index, result }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Now,
    ContextChanged,
}

/// Handle to a running autosave task
///
/// Dropping the controller without calling [`AutosaveController::shutdown`]
/// also stops the task once its trigger channel closes.
pub struct AutosaveController {
    triggers: mpsc::UnboundedSender<Trigger>,
    outcomes: broadcast::Sender<AutosaveOutcome>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl AutosaveController {
    /// Spawn the autosave task on the current tokio runtime
    pub fn spawn<S>(
        manager: Arc<SaveManager<S>>,
        config: AutosaveConfig,
        options: SaveOptions,
    ) -> Self
    where
        S: SlotStorage + 'static,
    {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run(
            manager,
            config,
            options,
            trigger_rx,
            outcomes.clone(),
            shutdown.clone(),
        ));

        Self {
            triggers,
            outcomes,
            shutdown,
            task,
        }
    }

    /// Request an immediate autosave; returns false once the task has stopped
    pub fn trigger_now(&self) -> bool {
        self.triggers.send(Trigger::Now).is_ok()
    }

    /// Signal a context change (scene switch, checkpoint). Saves after the
    /// debounce delay; further changes inside the window restart it.
    pub fn context_changed(&self) -> bool {
        self.triggers.send(Trigger::ContextChanged).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutosaveOutcome> {
        self.outcomes.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the task and wait for an in-flight save to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Autosave task ended abnormally");
        }
    }
}

/// Resolves when the pending debounce elapses, never when none is pending
async fn debounce_elapsed(pending: &mut Option<Pin<Box<Sleep>>>) {
    match pending.as_mut() {
        Some(timer) => timer.await,
        None => std::future::pending().await,
    }
}

fn run<S>(
    manager: Arc<SaveManager<S>>,
    config: AutosaveConfig,
    options: SaveOptions,
    mut triggers: mpsc::UnboundedReceiver<Trigger>,
    outcomes: broadcast::Sender<AutosaveOutcome>,
    shutdown: CancellationToken,
) -> impl Future<Output = ()> + Send
where
    S: SlotStorage + 'static,
{
    async move {
        // tokio intervals reject a zero period
        let period = config.interval.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending: Option<Pin<Box<Sleep>>> = None;

        info!(
            enabled = config.enabled,
            interval_secs = config.interval.as_secs_f64(),
            max_backups = config.max_backups,
            "Autosave task started"
        );

        loop {
            let reason = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick(), if config.enabled => "interval",
                _ = debounce_elapsed(&mut pending), if pending.is_some() => {
                    pending = None;
                    "context_change"
                }
                trigger = triggers.recv() => match trigger {
                    Some(Trigger::Now) => "manual",
                    Some(Trigger::ContextChanged) => {
                        if config.enabled && config.on_context_change {
                            pending = Some(Box::pin(sleep(config.debounce)));
                        }
                        continue;
                    }
                    None => break,
                },
            };

            let outcome = autosave_once(&manager, config.max_backups, &options).await;
            if outcome.result.status.is_ok() {
                debug!(reason, index = outcome.index, "Autosave complete");
            } else {
                warn!(
                    reason,
                    index = outcome.index,
                    status = ?outcome.result.status,
                    "Autosave failed"
                );
            }
            // No subscribers is fine
            let _ = outcomes.send(outcome);
        }

        debug!("Autosave task stopped");
    }
}
