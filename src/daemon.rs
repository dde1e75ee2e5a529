use anyhow::{Context, Result};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::backend::{AccountStore, AuthUser, IdentityProvider, UsageArchive};
use crate::error::{ErrorKind, LimiterError};
use crate::limits::clock::Clock;
use crate::limits::enforcement::UiSurface;
use crate::limits::ledger::UsageLedger;
use crate::limits::monitor::{AccessDecision, EnforcementMonitor, MonitorStatus};
use crate::limits::record::{DEFAULT_DAILY_LIMIT_SECONDS, UserId, UserUsageRecord};
use crate::limits::tracker::{SiteWindow, TrackerSettings, UsageTracker};
use crate::site::SiteMatcher;

/// Collaborators the daemon wires together
#[derive(Clone)]
pub struct DaemonServices {
    pub store: Arc<dyn AccountStore>,
    pub archive: Arc<dyn UsageArchive>,
    pub identity: Arc<dyn IdentityProvider>,
    pub surface: Arc<dyn UiSurface>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub tracker: TrackerSettings,
    pub max_flush_failures: u32,
    pub load_retry: Duration,
    /// Limit given to users that have no record yet
    pub default_limit_seconds: u64,
    pub matcher: SiteMatcher,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            tracker: TrackerSettings::default(),
            max_flush_failures: crate::limits::monitor::DEFAULT_MAX_FLUSH_FAILURES,
            load_retry: Duration::from_secs(5),
            default_limit_seconds: DEFAULT_DAILY_LIMIT_SECONDS,
            matcher: SiteMatcher::default(),
        }
    }
}

/// What the daemon is doing for the current identity
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    SignedOut,
    /// Signed in but the usage record is unavailable; access is not enforced
    Untracked { user_id: UserId, retrying: bool },
    Active(MonitorStatus),
}

enum DaemonCommand {
    OpenSite {
        url: String,
        window: Box<dyn SiteWindow>,
        reply: oneshot::Sender<Result<AccessDecision>>,
    },
    SetLimit {
        minutes: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    SignOut {
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

/// Follows sign-in state and runs a usage tracker for whoever is signed in
pub struct LimiterDaemon {
    commands: mpsc::Sender<DaemonCommand>,
    handle: JoinHandle<()>,
}

impl LimiterDaemon {
    pub fn start(services: DaemonServices, settings: DaemonSettings) -> Self {
        let (commands, receiver) = mpsc::channel(16);
        let auth = services.identity.auth_state();

        info!(
            "Starting limiter daemon (restricted hosts: {})",
            settings.matcher.hosts().join(", ")
        );

        let task = DaemonTask {
            services,
            settings,
            session: Session::SignedOut,
        };
        let handle = tokio::spawn(task.run(auth, receiver));

        Self { commands, handle }
    }

    /// Open a URL; restricted sites go through the signed-in user's tracker
    pub async fn open_site(&self, url: &str, window: impl SiteWindow + 'static) -> Result<AccessDecision> {
        let (reply, response) = oneshot::channel();
        self.send(DaemonCommand::OpenSite {
            url: url.to_string(),
            window: Box::new(window),
            reply,
        })
        .await?;
        response.await.context("Limiter daemon dropped the request")?
    }

    pub async fn set_limit(&self, minutes: i64) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(DaemonCommand::SetLimit { minutes, reply }).await?;
        response.await.context("Limiter daemon dropped the request")?
    }

    /// Sign out; the tracker is stopped and its usage saved before this returns
    pub async fn sign_out(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(DaemonCommand::SignOut { reply }).await?;
        response.await.context("Limiter daemon dropped the request")?
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let (reply, response) = oneshot::channel();
        self.send(DaemonCommand::Status { reply }).await?;
        response.await.context("Limiter daemon dropped the request")
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.commands.send(DaemonCommand::Shutdown).await;
        self.handle.await.context("Limiter daemon task failed")?;
        info!("Limiter daemon stopped");
        Ok(())
    }

    async fn send(&self, command: DaemonCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("Limiter daemon is not running"))
    }
}

enum Session {
    SignedOut,
    Untracked {
        user: AuthUser,
        retry: Option<Interval>,
    },
    Active(UsageTracker),
}

impl Session {
    fn user_id(&self) -> Option<&UserId> {
        match self {
            Session::SignedOut => None,
            Session::Untracked { user, .. } => Some(&user.user_id),
            Session::Active(tracker) => Some(tracker.user_id()),
        }
    }
}

struct DaemonTask {
    services: DaemonServices,
    settings: DaemonSettings,
    session: Session,
}

impl DaemonTask {
    async fn run(mut self, mut auth: watch::Receiver<Option<AuthUser>>, mut commands: mpsc::Receiver<DaemonCommand>) {
        let initial = auth.borrow_and_update().clone();
        self.follow(initial).await;

        loop {
            tokio::select! {
                biased;

                changed = auth.changed() => {
                    if changed.is_err() {
                        warn!("Identity provider closed; stopping");
                        break;
                    }
                    let user = auth.borrow_and_update().clone();
                    self.follow(user).await;
                }
                _ = next_retry(&mut self.session) => self.retry_load(),
                command = commands.recv() => match command {
                    Some(DaemonCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
            }
        }

        self.end_session().await;
    }

    async fn handle(&mut self, command: DaemonCommand) {
        match command {
            DaemonCommand::OpenSite { url, window, reply } => {
                let decision = self.open_site(&url, window).await;
                let _ = reply.send(decision);
            }
            DaemonCommand::SetLimit { minutes, reply } => {
                let result = match &self.session {
                    Session::Active(tracker) => tracker.set_limit(minutes).await,
                    Session::SignedOut => Err(LimiterError::Unauthenticated.into()),
                    Session::Untracked { user, .. } => Err(LimiterError::Persistence(format!(
                        "usage record for {} is not loaded",
                        user.user_id
                    ))
                    .into()),
                };
                let _ = reply.send(result);
            }
            DaemonCommand::SignOut { reply } => {
                let result: Result<()> = self.services.identity.sign_out().map_err(Into::into);
                if result.is_ok() {
                    self.follow(None).await;
                }
                let _ = reply.send(result);
            }
            DaemonCommand::Status { reply } => {
                let status = match &self.session {
                    Session::SignedOut => SessionStatus::SignedOut,
                    Session::Untracked { user, retry } => SessionStatus::Untracked {
                        user_id: user.user_id.clone(),
                        retrying: retry.is_some(),
                    },
                    Session::Active(tracker) => match tracker.status().await {
                        Ok(status) => SessionStatus::Active(status),
                        Err(e) => {
                            error!("Failed to read tracker status: {:#}", e);
                            SessionStatus::SignedOut
                        }
                    },
                };
                let _ = reply.send(status);
            }
            DaemonCommand::Shutdown => {}
        }
    }

    async fn open_site(&mut self, url: &str, window: Box<dyn SiteWindow>) -> Result<AccessDecision> {
        if !self.settings.matcher.is_restricted(url) {
            return Ok(AccessDecision::Unrestricted);
        }

        match &self.session {
            Session::Active(tracker) => tracker.open_site(window).await,
            Session::SignedOut => {
                info!("Restricted site opened while signed out; not tracked");
                Ok(AccessDecision::Untracked)
            }
            Session::Untracked { user, .. } => {
                warn!("Usage data for {} unavailable; allowing access untracked", user.user_id);
                Ok(AccessDecision::Untracked)
            }
        }
    }

    /// Move the session to the given identity
    async fn follow(&mut self, user: Option<AuthUser>) {
        let wanted = user.as_ref().map(|u| &u.user_id);
        if self.session.user_id() == wanted {
            return;
        }

        self.end_session().await;
        if let Some(user) = user {
            self.session = self.begin_session(user);
        }
    }

    async fn end_session(&mut self) {
        match std::mem::replace(&mut self.session, Session::SignedOut) {
            Session::Active(tracker) => {
                if let Err(e) = tracker.stop().await {
                    error!("Failed to stop usage tracker: {:#}", e);
                }
            }
            Session::Untracked { user, .. } => info!("Dropping untracked session for {}", user.user_id),
            Session::SignedOut => {}
        }
    }

    fn retry_load(&mut self) {
        if let Session::Untracked { user, .. } = std::mem::replace(&mut self.session, Session::SignedOut) {
            info!("Retrying usage record load for {}", user.user_id);
            self.session = self.begin_session(user);
        }
    }

    fn begin_session(&self, user: AuthUser) -> Session {
        match self.load_ledger(&user) {
            Ok(ledger) => {
                let subscription = match self.services.store.subscribe(&user.user_id) {
                    Ok(subscription) => Some(subscription),
                    Err(e) => {
                        warn!("Could not subscribe to changes for {}: {}", user.user_id, e);
                        None
                    }
                };
                let monitor = EnforcementMonitor::new(
                    ledger,
                    self.services.surface.clone(),
                    self.settings.max_flush_failures,
                );
                Session::Active(UsageTracker::start(
                    monitor,
                    subscription,
                    self.settings.tracker,
                    self.services.clock.clone(),
                ))
            }
            Err(e) if e.is_terminal() => {
                error!("Cannot track usage for {}: {}", user.user_id, e);
                Session::Untracked { user, retry: None }
            }
            Err(e) => {
                warn!(
                    "Failed to load usage for {} (retrying in {}s): {}",
                    user.user_id,
                    self.settings.load_retry.as_secs(),
                    e
                );
                let period = self.settings.load_retry;
                let mut retry = time::interval_at(Instant::now() + period, period);
                retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Session::Untracked {
                    user,
                    retry: Some(retry),
                }
            }
        }
    }

    fn load_ledger(&self, user: &AuthUser) -> crate::error::Result<UsageLedger> {
        let store = self.services.store.clone();
        let archive = self.services.archive.clone();

        match UsageLedger::load(store.clone(), archive.clone(), &user.user_id) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No usage record for {}; creating one", user.user_id);
                let today = self.services.clock.now().date_naive();
                let mut record =
                    UserUsageRecord::new(user.user_id.clone(), self.settings.default_limit_seconds, today);
                if let Some(email) = &user.email {
                    record = record.with_email(email);
                }
                store.set_record(&record)?;
                UsageLedger::load(store, archive, &user.user_id)
            }
            other => other,
        }
    }
}

async fn next_retry(session: &mut Session) {
    match session {
        Session::Untracked {
            retry: Some(retry), ..
        } => {
            retry.tick().await;
        }
        _ => pending::<()>().await,
    }
}
