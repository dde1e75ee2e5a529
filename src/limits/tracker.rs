use anyhow::{Context, Result};
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::monitor::{AccessDecision, EnforcementMonitor, MonitorStatus};
use super::record::{UserId, UserUsageRecord};
use crate::backend::RecordSubscription;

/// Liveness of an opened restricted-site window
pub trait SiteWindow: Send + Sync {
    fn is_closed(&self) -> bool;
}

impl<W: SiteWindow + ?Sized> SiteWindow for Box<W> {
    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// Window handle backed by a shared flag
#[derive(Debug, Clone, Default)]
pub struct WindowFlag {
    closed: Arc<AtomicBool>,
}

impl WindowFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl SiteWindow for WindowFlag {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Timer periods for the tracker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub status_poll: Duration,
    pub accrual_flush: Duration,
    pub liveness_poll: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            status_poll: Duration::from_secs(1),
            accrual_flush: Duration::from_secs(5),
            liveness_poll: Duration::from_secs(1),
        }
    }
}

enum Command {
    OpenSite {
        window: Box<dyn SiteWindow>,
        reply: oneshot::Sender<AccessDecision>,
    },
    SetLimit {
        minutes: i64,
        reply: oneshot::Sender<crate::error::Result<()>>,
    },
    Status {
        reply: oneshot::Sender<MonitorStatus>,
    },
    Stop,
}

/// Handle to the task enforcing the limit for one signed-in user
pub struct UsageTracker {
    user_id: UserId,
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

impl UsageTracker {
    /// Spawn the tracker task; it owns the monitor until stopped
    pub fn start(
        monitor: EnforcementMonitor,
        subscription: Option<RecordSubscription>,
        settings: TrackerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let user_id = monitor.ledger().user_id().clone();
        let (commands, receiver) = mpsc::channel(16);

        info!("Starting usage tracker for {}", user_id);

        let task = TrackerTask {
            monitor,
            subscription,
            windows: Vec::new(),
            accrual: None,
            settings,
            clock,
        };
        let handle = tokio::spawn(task.run(receiver));

        Self {
            user_id,
            commands,
            handle,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Ask to open the restricted site; a granted visit is tracked until the window closes
    pub async fn open_site(&self, window: impl SiteWindow + 'static) -> Result<AccessDecision> {
        let (reply, response) = oneshot::channel();
        self.send(Command::OpenSite {
            window: Box::new(window),
            reply,
        })
        .await?;
        response.await.context("Usage tracker dropped the request")
    }

    pub async fn set_limit(&self, minutes: i64) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetLimit { minutes, reply }).await?;
        response
            .await
            .context("Usage tracker dropped the request")?
            .map_err(Into::into)
    }

    pub async fn status(&self) -> Result<MonitorStatus> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        response.await.context("Usage tracker dropped the request")
    }

    /// Final accrual and flush, then wait for the task to finish
    pub async fn stop(self) -> Result<()> {
        // A closed channel means the task already ended
        let _ = self.commands.send(Command::Stop).await;
        self.handle.await.context("Usage tracker task failed")?;
        info!("Usage tracker for {} stopped", self.user_id);
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("Usage tracker for {} is not running", self.user_id))
    }
}

struct TrackerTask {
    monitor: EnforcementMonitor,
    subscription: Option<RecordSubscription>,
    windows: Vec<Box<dyn SiteWindow>>,
    /// Present only while a session is tracked
    accrual: Option<Interval>,
    settings: TrackerSettings,
    clock: Arc<dyn Clock>,
}

impl TrackerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut status = time::interval(self.settings.status_poll);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness = time::interval(self.settings.liveness_poll);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = next_tick(&mut self.accrual) => {
                    let now = self.clock.now();
                    debug!("Accrual tick for {}", self.monitor.ledger().user_id());
                    self.monitor.tick(now);
                    self.sync_session();
                }
                _ = liveness.tick() => self.check_windows(),
                update = next_update(&mut self.subscription) => match update {
                    Some(record) => {
                        self.monitor.absorb_remote(record, self.clock.now());
                        self.sync_session();
                    }
                    None => {
                        warn!("Account store subscription closed; remote changes will not be seen");
                        self.subscription = None;
                    }
                },
                _ = status.tick() => {
                    self.monitor.poll_status(self.clock.now());
                    self.sync_session();
                }
                command = commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle(command),
                },
            }
        }

        self.accrual = None;
        self.windows.clear();
        self.monitor.shutdown(self.clock.now());
    }

    fn handle(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::OpenSite { window, reply } => {
                let decision = self.monitor.request_access(now);
                if decision == AccessDecision::Tracking {
                    self.windows.push(window);
                }
                self.sync_session();
                let _ = reply.send(decision);
            }
            Command::SetLimit { minutes, reply } => {
                let result = self.monitor.set_limit(minutes, now);
                self.sync_session();
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.monitor.status());
            }
            Command::Stop => {}
        }
    }

    fn check_windows(&mut self) {
        if self.windows.is_empty() {
            return;
        }

        self.windows.retain(|window| !window.is_closed());
        if self.windows.is_empty() {
            self.monitor.site_closed(self.clock.now());
            self.sync_session();
        }
    }

    /// Keep the accrual timer and window list in step with the monitor state
    fn sync_session(&mut self) {
        if self.monitor.is_tracking() {
            if self.accrual.is_none() {
                let period = self.settings.accrual_flush;
                let mut accrual = time::interval_at(Instant::now() + period, period);
                accrual.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.accrual = Some(accrual);
            }
        } else {
            self.accrual = None;
            self.windows.clear();
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn next_update(subscription: &mut Option<RecordSubscription>) -> Option<UserUsageRecord> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => pending().await,
    }
}
