//! Per-tenant sync scheduler.
//!
//! A driver task owns all triggering state: the in-flight session, the retry
//! counter, the backoff deadline and the periodic timer. Handles talk to it
//! over a command channel and observe it through a status watch, so at most
//! one session per tenant can ever be running.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::retry::{RetryDecision, RetryPolicy, RetryState};
use super::session::{SessionError, SessionReport, SyncEngine};
use crate::models::TenantId;

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Running {
        attempt: u32,
        started_at: i64,
    },
    /// Last session failed. `next_retry_at` is `None` once attempts are used up.
    Backoff {
        failures: u32,
        next_retry_at: Option<i64>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Sync scheduler for tenant {0} has stopped")]
    Stopped(TenantId),
    #[error("Periodic sync interval must be greater than zero")]
    InvalidInterval,
}

#[derive(Debug)]
enum Command {
    TriggerNow,
    SchedulePeriodic(Duration),
    Cancel,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Manual,
    Periodic,
    Retry,
    Reconnect,
    FollowUp,
}

/// Handle to one tenant's scheduler task
#[derive(Debug)]
pub struct SyncScheduler {
    tenant_id: TenantId,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SyncStatus>,
    reports: watch::Receiver<Option<SessionReport>>,
    driver: JoinHandle<()>,
}

impl SyncScheduler {
    /// Start the driver task. Must be called within a tokio runtime.
    pub fn spawn(
        engine: SyncEngine,
        tenant_id: TenantId,
        connectivity: watch::Receiver<bool>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SyncStatus::Idle);
        let (report_tx, reports) = watch::channel(None);
        let online = *connectivity.borrow();

        let driver = Driver {
            engine,
            tenant_id: tenant_id.clone(),
            commands: command_rx,
            connectivity,
            online,
            status: status_tx,
            reports: report_tx,
            retry: RetryState::new(retry_policy),
            running: None,
            retry_at: None,
            periodic: None,
        };

        Self {
            tenant_id,
            commands,
            status,
            reports,
            driver: tokio::spawn(driver.run()),
        }
    }

    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Start a session now unless one is already running.
    ///
    /// Also resets the retry counter, un-parking a scheduler in backoff.
    pub fn trigger_now(&self) -> Result<(), SchedulerError> {
        self.send(Command::TriggerNow)
    }

    /// Run a session every `interval`, starting immediately
    pub fn schedule_periodic(&self, interval: Duration) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }
        self.send(Command::SchedulePeriodic(interval))
    }

    /// Abort the in-flight session and stop periodic and retry triggers
    pub fn cancel(&self) -> Result<(), SchedulerError> {
        self.send(Command::Cancel)
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Report of the most recent successful session
    pub fn last_report(&self) -> Option<SessionReport> {
        self.reports.borrow().clone()
    }

    /// Cancel any running session and wait for the driver to exit
    pub async fn shutdown(self) {
        if self.send(Command::Shutdown).is_ok() {
            if let Err(error) = self.driver.await {
                warn!(tenant = %self.tenant_id, %error, "Sync scheduler task failed");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .map_err(|_| SchedulerError::Stopped(self.tenant_id.clone()))
    }
}

type SessionHandle = JoinHandle<Result<SessionReport, SessionError>>;

struct Driver {
    engine: SyncEngine,
    tenant_id: TenantId,
    commands: mpsc::UnboundedReceiver<Command>,
    connectivity: watch::Receiver<bool>,
    online: bool,
    status: watch::Sender<SyncStatus>,
    reports: watch::Sender<Option<SessionReport>>,
    retry: RetryState,
    running: Option<SessionHandle>,
    retry_at: Option<Instant>,
    periodic: Option<Interval>,
}

impl Driver {
    async fn run(mut self) {
        let mut connectivity_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::TriggerNow) => self.on_manual_trigger(),
                    Some(Command::SchedulePeriodic(interval)) => self.set_periodic(interval),
                    Some(Command::Cancel) => self.cancel(),
                    Some(Command::Shutdown) | None => {
                        self.cancel();
                        break;
                    }
                },
                result = wait_session(&mut self.running) => {
                    self.running = None;
                    self.on_session_finished(result);
                }
                () = wait_deadline(self.retry_at) => self.on_retry_due(),
                () = wait_tick(&mut self.periodic) => self.on_periodic(),
                changed = self.connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        continue;
                    }
                    let online = *self.connectivity.borrow_and_update();
                    let restored = online && !self.online;
                    self.online = online;
                    if restored {
                        self.on_reconnect();
                    }
                }
            }
        }

        debug!(tenant = %self.tenant_id, "Sync scheduler stopped");
    }

    fn on_manual_trigger(&mut self) {
        if self.running.is_some() {
            debug!(tenant = %self.tenant_id, "Sync already running; trigger coalesced");
            return;
        }
        self.retry.reset();
        self.retry_at = None;
        self.start(Trigger::Manual);
    }

    fn on_periodic(&mut self) {
        if self.retry_at.is_some() || self.retry.is_exhausted() {
            debug!(tenant = %self.tenant_id, "Periodic sync skipped during backoff");
            return;
        }
        self.start(Trigger::Periodic);
    }

    fn on_retry_due(&mut self) {
        self.retry_at = None;
        if self.online {
            self.start(Trigger::Retry);
            return;
        }
        debug!(tenant = %self.tenant_id, "Retry due while offline; waiting for connectivity");
        self.status.send_replace(SyncStatus::Backoff {
            failures: self.retry.failures(),
            next_retry_at: None,
        });
    }

    fn on_reconnect(&mut self) {
        info!(tenant = %self.tenant_id, "Connectivity restored");
        self.retry.reset();
        self.retry_at = None;
        self.start(Trigger::Reconnect);
    }

    fn set_periodic(&mut self, interval: Duration) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.periodic = Some(timer);
        info!(tenant = %self.tenant_id, interval_secs = interval.as_secs(), "Periodic sync scheduled");
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.abort();
            info!(tenant = %self.tenant_id, "Sync session cancelled");
        }
        self.retry.reset();
        self.retry_at = None;
        self.periodic = None;
        self.status.send_replace(SyncStatus::Idle);
    }

    fn start(&mut self, trigger: Trigger) {
        if self.running.is_some() {
            debug!(tenant = %self.tenant_id, ?trigger, "Sync already running; trigger coalesced");
            return;
        }
        if !self.online {
            debug!(tenant = %self.tenant_id, ?trigger, "Offline; sync not started");
            return;
        }

        let attempt = self.retry.failures() + 1;
        let session = self.engine.session(self.tenant_id.clone(), attempt);
        let started_at = session.started_at();
        debug!(tenant = %self.tenant_id, ?trigger, attempt, "Starting sync session");

        self.running = Some(tokio::spawn(session.run()));
        self.status.send_replace(SyncStatus::Running {
            attempt,
            started_at,
        });
    }

    fn on_session_finished(
        &mut self,
        result: Result<Result<SessionReport, SessionError>, JoinError>,
    ) {
        let error = match result {
            Ok(Ok(report)) => {
                let follow_up = report.outbox_truncated;
                self.retry.reset();
                self.reports.send_replace(Some(report));
                self.status.send_replace(SyncStatus::Idle);
                if follow_up {
                    self.start(Trigger::FollowUp);
                }
                return;
            }
            Ok(Err(error)) => error,
            Err(join_error) if join_error.is_cancelled() => SessionError::Cancelled,
            Err(join_error) => {
                warn!(tenant = %self.tenant_id, error = %join_error, "Sync session task panicked");
                SessionError::Cancelled
            }
        };

        if matches!(error, SessionError::Cancelled) {
            self.status.send_replace(SyncStatus::Idle);
            return;
        }

        match self.retry.record_failure() {
            RetryDecision::RetryAfter(delay) => {
                self.retry_at = Some(Instant::now() + delay);
                let next_retry_at = self
                    .engine
                    .clock()
                    .now_millis()
                    .saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
                info!(
                    tenant = %self.tenant_id,
                    failures = self.retry.failures(),
                    delay_secs = delay.as_secs(),
                    "Sync failed; retry scheduled"
                );
                self.status.send_replace(SyncStatus::Backoff {
                    failures: self.retry.failures(),
                    next_retry_at: Some(next_retry_at),
                });
            }
            RetryDecision::Exhausted => {
                self.retry_at = None;
                warn!(
                    tenant = %self.tenant_id,
                    failures = self.retry.failures(),
                    "Sync retries exhausted; waiting for reconnect or manual trigger"
                );
                self.status.send_replace(SyncStatus::Backoff {
                    failures: self.retry.failures(),
                    next_retry_at: None,
                });
            }
        }
    }
}

async fn wait_session(
    running: &mut Option<SessionHandle>,
) -> Result<Result<SessionReport, SessionError>, JoinError> {
    match running {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_tick(periodic: &mut Option<Interval>) {
    match periodic {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
