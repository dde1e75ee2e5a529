use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use super::utils::{format_duration, init_logging, progress_bar};
use super::{Workspace, resolve_config_path};
use crate::backend::{AccountStore, AuthUser, FileAccountStore, IdentityProvider, LocalIdentity};
use crate::config::{LimiterConfig, LoggingConfig};
use crate::error::ErrorKind;
use crate::limits::ledger::UsageLedger;
use crate::limits::record::{UserId, UserUsageRecord, local_today};

/// Create the account configuration and its usage record
pub fn init(
    config_path: Option<PathBuf>,
    email: String,
    limit: i64,
    user_id: Option<String>,
    force: bool,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose, &LoggingConfig::default())?;

    let path = resolve_config_path(config_path)?;
    if path.exists() && !force {
        anyhow::bail!(
            "An account is already configured at {}. Use --force to replace it.",
            path.display()
        );
    }

    let user_id = user_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut config = LimiterConfig::new(user_id, Some(email.clone()));
    config.limits.default_daily_limit_minutes = limit;
    config.validate().context("Invalid account settings")?;

    println!("YouTube Daily Limiter - Account Setup");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    config.save(&path)?;
    println!("✓ Configuration saved to: {}", path.display());

    let records_path = config.records_path()?;
    let store = FileAccountStore::new(&records_path);
    let id = UserId::new(config.account.user_id.as_str());

    match store.get_record(&id) {
        Ok(_) if !force => {
            println!("✓ Existing usage record kept ({})", records_path.display());
        }
        Ok(_) | Err(_) => {
            let record = UserUsageRecord::new(id.clone(), config.default_limit_seconds(), local_today())
                .with_email(email);
            store.set_record(&record).context("Failed to create usage record")?;
            println!("✓ Usage record created ({})", records_path.display());
        }
    }

    println!();
    println!("Account:      {}", id);
    println!("Daily limit:  {} minutes", limit);
    println!();
    println!("Next steps:");
    println!("  yt-limiter status     Show today's usage");
    println!("  yt-limiter watch      Start a tracked session");

    Ok(())
}

/// Show today's usage
pub fn status(config_path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    init_logging(verbose, &workspace.config.logging)?;

    let mut ledger = load_ledger(&workspace)?;
    if let Err(e) = ledger.roll_over_if_needed(local_today()) {
        warn!("Could not save the daily reset: {}", e);
    }

    let record = ledger.record();
    let percent = ledger.percent_used();

    println!("YouTube Usage Today");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Account:      {}", record.user_id);
    if let Some(email) = &record.email {
        println!("Email:        {}", email);
    }
    println!("Used:         {}", format_duration(record.current_usage_seconds));
    println!("Daily limit:  {}", format_duration(record.daily_limit_seconds));
    println!("Remaining:    {}", format_duration(record.remaining_seconds()));
    println!("Progress:     {} {:.0}%", progress_bar(percent, 30), percent);
    println!(
        "Status:       {}",
        if ledger.is_blocked() { "Blocked" } else { "Active" }
    );
    if let Some(updated) = record.last_updated {
        println!(
            "Last update:  {}",
            updated.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
        );
    }

    if ledger.is_blocked() {
        println!();
        println!("Daily limit reached. YouTube will be available again after midnight.");
    }

    Ok(())
}

/// Change the daily limit
pub fn set_limit(config_path: Option<PathBuf>, minutes: i64, verbose: bool) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    init_logging(verbose, &workspace.config.logging)?;

    let mut ledger = load_ledger(&workspace)?;
    if let Err(e) = ledger.roll_over_if_needed(local_today()) {
        warn!("Could not save the daily reset: {}", e);
    }

    ledger.set_limit(minutes).context("Failed to update daily limit")?;

    println!(
        "✓ Daily limit set to {} minutes ({})",
        minutes,
        format_duration(ledger.record().daily_limit_seconds)
    );
    if ledger.is_blocked() {
        println!("Today's usage already exceeds the new limit; YouTube stays blocked until midnight.");
    }

    Ok(())
}

/// Sign out and remove the account configuration; usage records are kept
pub fn logout(config_path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    init_logging(verbose, &workspace.config.logging)?;

    let mut user = AuthUser::new(workspace.config.account.user_id.as_str());
    user.email = workspace.config.account.email.clone();
    let identity = LocalIdentity::signed_in(user);
    identity.sign_out().context("Failed to sign out")?;

    std::fs::remove_file(&workspace.config_path).with_context(|| {
        format!(
            "Failed to remove config file: {}",
            workspace.config_path.display()
        )
    })?;

    println!("✓ Signed out {}", workspace.user_id());
    println!(
        "Usage records are kept in {}",
        workspace.config.records_path()?.display()
    );

    Ok(())
}

fn load_ledger(workspace: &Workspace) -> Result<UsageLedger> {
    let user_id = workspace.user_id();
    UsageLedger::load(workspace.store.clone(), workspace.archive.clone(), &user_id).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            anyhow::anyhow!(
                "No usage record for {}. Run 'yt-limiter init --force' to create one.",
                user_id
            )
        } else {
            anyhow::Error::new(e).context("Failed to load usage record")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn config_in(dir: &TempDir) -> PathBuf {
        dir.child("config.toml").path().to_path_buf()
    }

    fn init_in(dir: &TempDir, limit: i64, force: bool) -> Result<()> {
        let path = config_in(dir);
        // Keep records and history inside the temp dir
        if !path.exists() || force {
            let mut config = LimiterConfig::new("kid", Some("kid@example.com".to_string()));
            config.storage.records_path = Some(dir.child("records.json").path().to_path_buf());
            config.storage.history_path = Some(dir.child("history.json").path().to_path_buf());
            config.limits.default_daily_limit_minutes = limit;
            config.save(&path)?;
        }
        Ok(())
    }

    fn workspace(dir: &TempDir) -> Workspace {
        Workspace::open(Some(config_in(dir))).unwrap()
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = config_in(&dir);
        dir.child("config.toml").write_str("[account]\nuser_id = \"kid\"\n").unwrap();

        let err = init(
            Some(path),
            "kid@example.com".to_string(),
            60,
            Some("kid".to_string()),
            false,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--force"));
    }

    #[test]
    fn init_rejects_out_of_range_limit() {
        let dir = TempDir::new().unwrap();
        let err = init(
            Some(config_in(&dir)),
            "kid@example.com".to_string(),
            0,
            Some("kid".to_string()),
            false,
            false,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("default_daily_limit_minutes"));
        dir.child("config.toml").assert(predicate::path::missing());
    }

    #[test]
    fn set_limit_persists_minutes_as_seconds() {
        let dir = TempDir::new().unwrap();
        init_in(&dir, 120, false).unwrap();
        let ws = workspace(&dir);
        ws.store
            .set_record(&UserUsageRecord::new(UserId::new("kid"), 7200, local_today()))
            .unwrap();

        set_limit(Some(config_in(&dir)), 90, false).unwrap();

        let record = ws.store.get_record(&UserId::new("kid")).unwrap();
        assert_eq!(record.daily_limit_seconds, 5400);
        dir.child("records.json")
            .assert(predicate::str::contains("\"dailyLimitSeconds\": 5400"));
    }

    #[test]
    fn set_limit_rejects_invalid_values_without_writing() {
        let dir = TempDir::new().unwrap();
        init_in(&dir, 120, false).unwrap();
        let ws = workspace(&dir);
        ws.store
            .set_record(&UserUsageRecord::new(UserId::new("kid"), 7200, local_today()))
            .unwrap();

        for minutes in [0, -5, 1441] {
            assert!(set_limit(Some(config_in(&dir)), minutes, false).is_err());
        }
        let record = ws.store.get_record(&UserId::new("kid")).unwrap();
        assert_eq!(record.daily_limit_seconds, 7200);
    }

    #[test]
    fn status_without_record_points_to_init() {
        let dir = TempDir::new().unwrap();
        init_in(&dir, 120, false).unwrap();

        let err = status(Some(config_in(&dir)), false).unwrap_err();
        assert!(err.to_string().contains("init --force"));
    }

    #[test]
    fn logout_removes_config_but_keeps_records() {
        let dir = TempDir::new().unwrap();
        init_in(&dir, 120, false).unwrap();
        workspace(&dir)
            .store
            .set_record(&UserUsageRecord::new(UserId::new("kid"), 7200, local_today()))
            .unwrap();

        logout(Some(config_in(&dir)), false).unwrap();

        dir.child("config.toml").assert(predicate::path::missing());
        dir.child("records.json").assert(predicate::path::exists());
        assert!(Workspace::open(Some(config_in(&dir))).is_err());
    }
}
