use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::Workspace;
use super::utils::{format_duration, init_logging, progress_bar};
use crate::backend::{AuthUser, LocalIdentity};
use crate::daemon::{DaemonServices, LimiterDaemon, SessionStatus};
use crate::limits::clock::SystemClock;
use crate::limits::enforcement::{ChannelSurface, FanoutSurface, NotifyingSurface, UiEvent, UiSurface};
use crate::limits::monitor::AccessDecision;
use crate::limits::tracker::WindowFlag;

/// Open a tracked session and enforce the limit until interrupted
pub fn watch(config_path: Option<PathBuf>, url: String, minutes: Option<u64>, verbose: bool) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    init_logging(verbose, &workspace.config.logging)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_session(workspace, url, minutes.map(|m| Duration::from_secs(m * 60))))
}

async fn run_session(workspace: Workspace, url: String, limit: Option<Duration>) -> Result<()> {
    let (channel, mut events) = ChannelSurface::new();
    let surfaces: Vec<Arc<dyn UiSurface>> = vec![Arc::new(NotifyingSurface), Arc::new(channel)];
    let surface = FanoutSurface::new(surfaces);

    let mut user = AuthUser::new(workspace.config.account.user_id.as_str());
    user.email = workspace.config.account.email.clone();

    let services = DaemonServices {
        store: workspace.store.clone(),
        archive: workspace.archive.clone(),
        identity: Arc::new(LocalIdentity::signed_in(user)),
        surface: Arc::new(surface),
        clock: Arc::new(SystemClock),
    };
    let daemon = LimiterDaemon::start(services, workspace.config.daemon_settings());

    let window = WindowFlag::new();
    let decision = daemon.open_site(&url, window.clone()).await?;

    match decision {
        AccessDecision::Tracking => {
            println!("Tracking {} (Ctrl+C to stop)", url);
            print_status(&daemon).await;
            follow_session(&daemon, &mut events, limit).await?;
            window.close();
        }
        AccessDecision::Blocked => {
            println!("⛔ Daily limit reached. YouTube will be available again after midnight.");
        }
        AccessDecision::Unrestricted => {
            println!("{} is not a restricted site; nothing to track.", url);
        }
        AccessDecision::Untracked => {
            println!("⚠ Usage data is unavailable; {} is allowed without tracking.", url);
        }
    }

    print_status(&daemon).await;
    daemon.shutdown().await
}

/// Print UI events until the user stops, the time runs out or the site gets blocked
async fn follow_session(
    daemon: &LimiterDaemon,
    events: &mut mpsc::UnboundedReceiver<UiEvent>,
    limit: Option<Duration>,
) -> Result<()> {
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut report = tokio::time::interval(Duration::from_secs(60));
    report.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                println!();
                println!("Stopping session");
                return Ok(());
            }
            _ = &mut deadline => {
                println!("Session time is over");
                return Ok(());
            }
            _ = report.tick() => print_status(daemon).await,
            event = events.recv() => match event {
                Some(UiEvent::ShowBlockOverlay { limit_minutes }) => {
                    println!(
                        "⛔ Time's up! You've reached your daily limit of {} minutes.",
                        limit_minutes
                    );
                }
                Some(UiEvent::PauseMedia) => {
                    println!("Playback paused.");
                    return Ok(());
                }
                Some(UiEvent::SyncDegraded { consecutive_failures }) => {
                    println!(
                        "⚠ Usage could not be saved ({} attempts); still retrying",
                        consecutive_failures
                    );
                }
                Some(UiEvent::HideBlockOverlay) | Some(UiEvent::UpdateProgress { .. }) => {}
                None => return Ok(()),
            },
        }
    }
}

async fn print_status(daemon: &LimiterDaemon) {
    match daemon.status().await {
        Ok(SessionStatus::Active(status)) => {
            let record = &status.record;
            println!(
                "{} {:.0}%  {} of {} used ({})",
                progress_bar(status.percent_used, 20),
                status.percent_used,
                format_duration(record.current_usage_seconds),
                format_duration(record.daily_limit_seconds),
                status.state.name()
            );
        }
        Ok(SessionStatus::Untracked { user_id, .. }) => {
            println!("Usage for {} is not available yet", user_id);
        }
        Ok(SessionStatus::SignedOut) => println!("Not signed in"),
        Err(e) => tracing::warn!("Failed to read status: {:#}", e),
    }
}
