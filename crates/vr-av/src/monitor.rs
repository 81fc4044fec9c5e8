//! Background liveness monitor for transcoders.
//!
//! Polls the [`Supervisor`] on a fixed interval. Streams whose process died
//! are moved to `Stopped`; with `auto_restart` they are relaunched as tracked
//! tasks after an exponential backoff that resets once a relaunch has stayed
//! up for the full backoff ceiling. A stream stopped or disabled by an
//! operator while its relaunch is pending stays down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vr_core::config::TranscoderConfig;
use vr_core::tasks::{TaskStatus, TaskStore};
use vr_core::TaskId;

use crate::supervisor::{StreamState, Supervisor};

/// Restart bookkeeping for one crashed stream.
#[derive(Debug, Default)]
struct RestartState {
    attempts: u32,
    due: Option<Instant>,
    task: Option<TaskId>,
}

pub struct LivenessMonitor {
    supervisor: Arc<Supervisor>,
    tasks: Arc<TaskStore>,
    interval: Duration,
    auto_restart: bool,
    backoff_initial: Duration,
    backoff_max: Duration,
    restarts: HashMap<String, RestartState>,
}

impl LivenessMonitor {
    pub fn new(
        supervisor: Arc<Supervisor>,
        tasks: Arc<TaskStore>,
        config: &TranscoderConfig,
    ) -> Self {
        let backoff_initial = Duration::from_secs(config.restart_backoff_initial_secs.max(1));
        Self {
            supervisor,
            tasks,
            interval: Duration::from_secs(config.monitor_interval_secs),
            auto_restart: config.auto_restart,
            backoff_initial,
            backoff_max: Duration::from_secs(config.restart_backoff_max_secs).max(backoff_initial),
            restarts: HashMap::new(),
        }
    }

    /// Override the polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the polling loop until `cancel` fires. Returns `None` when the
    /// interval is zero (monitor disabled).
    pub fn spawn(mut self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            tracing::info!("Liveness monitor disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            tracing::info!(
                interval = ?self.interval,
                auto_restart = self.auto_restart,
                "Liveness monitor started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.tick().await,
                }
            }
            tracing::info!("Liveness monitor stopped");
        }))
    }

    /// One polling pass.
    pub async fn tick(&mut self) {
        let crashed = self.supervisor.reap_exited().await;
        if !self.auto_restart {
            return;
        }

        let now = Instant::now();
        for id in crashed {
            let entry = self.restarts.entry(id.clone()).or_default();
            let delay = backoff_delay(self.backoff_initial, self.backoff_max, entry.attempts);
            entry.attempts += 1;
            entry.due = Some(now + delay);
            entry.task = None;
            tracing::info!(stream = %id, attempt = entry.attempts, ?delay, "Scheduling restart");
        }

        let ids: Vec<String> = self.restarts.keys().cloned().collect();
        for id in ids {
            self.advance(&id, now).await;
        }
    }

    async fn advance(&mut self, id: &str, now: Instant) {
        let (stream_state, launched_at) = self.supervisor.stream_state(id).await;
        let Some(entry) = self.restarts.get_mut(id) else {
            return;
        };

        if let Some(due) = entry.due {
            if now >= due {
                entry.due = None;
                let supervisor = Arc::clone(&self.supervisor);
                let stream = id.to_string();
                let (task, _) = self.tasks.spawn_tracked("restart_stream", async move {
                    supervisor.relaunch(&stream).await
                });
                entry.task = Some(task);
            }
            return;
        }

        let Some(task) = entry.task else {
            self.restarts.remove(id);
            return;
        };
        let task_status = self.tasks.get(task).map(|r| r.status);

        match task_status {
            Some(TaskStatus::Pending | TaskStatus::Running) => {}
            Some(TaskStatus::Failed) => {
                let delay = backoff_delay(self.backoff_initial, self.backoff_max, entry.attempts);
                entry.attempts += 1;
                entry.due = Some(now + delay);
                entry.task = None;
                tracing::warn!(
                    stream = id,
                    attempt = entry.attempts,
                    ?delay,
                    "Restart failed; retrying"
                );
            }
            Some(TaskStatus::Completed) | None => {
                let healthy = stream_state == StreamState::Running
                    && launched_at.is_some_and(|at| {
                        (chrono::Utc::now() - at)
                            .to_std()
                            .is_ok_and(|up| up >= self.backoff_max)
                    });
                // Stopped by an operator, or up long enough to forget the history.
                if stream_state != StreamState::Running || healthy {
                    self.restarts.remove(id);
                }
            }
        }
    }
}

/// `initial * 2^attempts`, capped at `max`.
fn backoff_delay(initial: Duration, max: Duration, attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.min(16));
    initial.saturating_mul(factor).min(max)
}
