// src/updater/scheduler.rs

//! Periodic driver for [`UpdateManager::check_for_update`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::manager::UpdateManager;

/// One hour.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(3_600_000);

struct ActiveRun {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Runs one deferred check on activation and then one per interval.
pub struct PollScheduler {
    manager: Arc<UpdateManager>,
    check_interval: Duration,
    run: Option<ActiveRun>,
}

impl PollScheduler {
    pub fn new(manager: Arc<UpdateManager>) -> Self {
        Self::with_interval(manager, DEFAULT_CHECK_INTERVAL)
    }

    pub fn with_interval(manager: Arc<UpdateManager>, check_interval: Duration) -> Self {
        Self {
            manager,
            check_interval,
            run: None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn is_active(&self) -> bool {
        self.run.is_some()
    }

    /// Start polling. The first check runs on the spawned task, never inside
    /// this call. An earlier run is stopped first.
    pub fn activate(&mut self) {
        self.deactivate();

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let manager = Arc::clone(&self.manager);
        let period = self.check_interval;

        let task = tokio::spawn(async move {
            // The first tick completes immediately.
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        // The check is entered while the stop flag is
                        // borrowed, and deactivate waits on that borrow.
                        let begun = {
                            let stopped = stop_rx.borrow();
                            if *stopped {
                                break;
                            }
                            manager.begin_check()
                        };
                        if let Some(epoch) = begun {
                            log::debug!("Update: scheduled check");
                            manager.run_check(epoch).await;
                        }
                    }
                }
            }
            log::debug!("Update: poll loop stopped");
        });

        log::info!(
            "Update: polling every {}s",
            self.check_interval.as_secs_f64()
        );
        self.run = Some(ActiveRun { stop_tx, task });
    }

    /// Stop polling. No check starts after this returns; a check that had
    /// already entered `Checking` is left to finish so the status settles.
    pub fn deactivate(&mut self) {
        if let Some(run) = self.run.take() {
            run.stop_tx.send_replace(true);
            // Detached, the loop exits on its own once it sees the stop flag.
            drop(run.task);
            log::info!("Update: polling stopped");
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.deactivate();
    }
}
