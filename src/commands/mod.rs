pub mod account;
pub mod history;
pub mod utils;
pub mod watch;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{FileAccountStore, FileUsageArchive};
use crate::cli::{Args, Commands};
use crate::config::{self, LimiterConfig};
use crate::limits::record::UserId;

/// Loaded configuration plus the stores it points at
pub struct Workspace {
    pub config_path: PathBuf,
    pub config: LimiterConfig,
    pub store: Arc<FileAccountStore>,
    pub archive: Arc<FileUsageArchive>,
}

impl Workspace {
    pub fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = resolve_config_path(config_path)?;
        if !config_path.exists() {
            anyhow::bail!(
                "No account configured at {}. Run 'yt-limiter init --email <EMAIL>' first.",
                config_path.display()
            );
        }

        let config = LimiterConfig::load(&config_path)?;
        let store = Arc::new(FileAccountStore::new(config.records_path()?));
        let archive = Arc::new(FileUsageArchive::new(config.history_path()?));

        Ok(Self {
            config_path,
            config,
            store,
            archive,
        })
    }

    pub fn user_id(&self) -> UserId {
        UserId::new(self.config.account.user_id.as_str())
    }
}

pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => config::get_config_path().context("Pass --config to choose a config file"),
    }
}

/// Dispatch a parsed command line
pub fn run_command(args: Args) -> Result<()> {
    let verbose = args.verbose;
    let config = args.config;

    match args.command {
        Commands::Init {
            email,
            limit,
            user_id,
            force,
        } => account::init(config, email, limit, user_id, force, verbose),
        Commands::Status => account::status(config, verbose),
        Commands::SetLimit { minutes } => account::set_limit(config, minutes, verbose),
        Commands::Watch { url, minutes } => watch::watch(config, url, minutes, verbose),
        Commands::History { period } => history::history(config, period, verbose),
        Commands::Logout => account::logout(config, verbose),
    }
}
