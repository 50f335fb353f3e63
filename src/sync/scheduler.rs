//! Sync scheduler - decides when to drain
//!
//! Drain passes are triggered by reconnect, app resume, new enqueues, manual
//! retry, and a periodic timer. After a pass that left records queued the
//! timer backs off exponentially (capped) so a degraded ledger is not hammered.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::sync::engine::{DrainReport, SyncEngine};

const COMMAND_BUFFER: usize = 16;

/// Why a drain pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Network connectivity came back
    Reconnect,
    /// App returned to the foreground
    Resume,
    /// User asked to retry
    Manual,
    /// A new record was queued
    Enqueued,
}

impl SyncTrigger {
    /// Whether this trigger signals conditions changed enough to forget past failures
    fn resets_backoff(&self) -> bool {
        !matches!(self, SyncTrigger::Enqueued)
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            max,
            jitter,
            failures: 0,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failed passes, without jitter
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Record a failed pass and return how long to wait
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.delay_for(self.failures);
        if self.jitter && !delay.is_zero() {
            // Shave up to 25% so devices that failed together spread out
            let shave = rand::thread_rng().gen_range(0.0..0.25);
            delay.mul_f64(1.0 - shave)
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

enum Command {
    Trigger(SyncTrigger),
    RetryNow(oneshot::Sender<Result<DrainReport, SyncError>>),
}

/// Cloneable handle for requesting drain passes
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Request a pass without waiting for it.
    ///
    /// Returns `false` if the scheduler is stopped or already has a backlog of
    /// requests, in which case a pass is coming anyway.
    pub fn trigger(&self, trigger: SyncTrigger) -> bool {
        self.tx.try_send(Command::Trigger(trigger)).is_ok()
    }

    /// Run a pass now and wait for its report. `None` if the scheduler has stopped.
    pub async fn retry_now(&self) -> Option<Result<DrainReport, SyncError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::RetryNow(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

/// Runs drain passes on triggers and on a timer
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
    backoff: Backoff,
    rx: mpsc::Receiver<Command>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, config: &SyncConfig) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let scheduler = Self {
            engine,
            interval: Duration::from_secs(config.interval_secs),
            backoff: Backoff::new(
                Duration::from_secs(config.backoff_base_secs),
                Duration::from_secs(config.backoff_max_secs),
                config.jitter,
            ),
            rx,
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Override the timer and backoff with explicit durations
    pub fn with_timing(mut self, interval: Duration, backoff: Backoff) -> Self {
        self.interval = interval;
        self.backoff = backoff;
        self
    }

    /// Run until every [`SchedulerHandle`] has been dropped.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Sync scheduler started");
        let mut next_due = Instant::now() + self.interval;

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Trigger(trigger)) => {
                        debug!(?trigger, "Drain triggered");
                        if trigger.resets_backoff() {
                            self.backoff.reset();
                        }
                        let result = self.engine.drain_once().await;
                        next_due = self.after_pass(&result);
                    }
                    Some(Command::RetryNow(reply)) => {
                        debug!("Manual retry requested");
                        self.backoff.reset();
                        let result = self.engine.drain_once().await;
                        next_due = self.after_pass(&result);
                        let _ = reply.send(result);
                    }
                    None => {
                        info!("Sync scheduler stopped");
                        break;
                    }
                },
                _ = tokio::time::sleep_until(next_due) => {
                    debug!("Periodic drain");
                    let result = self.engine.drain_once().await;
                    next_due = self.after_pass(&result);
                }
            }
        }
    }

    /// Pick the next timer deadline from the outcome of a pass
    fn after_pass(&mut self, result: &Result<DrainReport, SyncError>) -> Instant {
        let delay = match result {
            Ok(report) if report.is_clean() => {
                self.backoff.reset();
                self.interval
            }
            Ok(report) => {
                let delay = self.backoff.next_delay();
                info!(
                    deferred = report.deferred.len(),
                    failures = self.backoff.failures(),
                    delay_ms = delay.as_millis() as u64,
                    "Records still pending, backing off"
                );
                delay
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Drain failed, backing off");
                delay
            }
        };
        Instant::now() + delay
    }
}
