use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::limits::history::Period;

/// YouTube Daily Limiter
///
/// Tracks time spent on YouTube against a per-user daily limit and blocks
/// the site once the limit is reached. The counter resets at local midnight.
#[derive(Parser, Debug)]
#[command(name = "yt-limiter")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the account and its usage record
    Init {
        /// Email address of the account
        #[arg(long)]
        email: String,

        /// Daily limit in minutes
        #[arg(long, default_value = "120")]
        limit: i64,

        /// Account id (generated when omitted)
        #[arg(long)]
        user_id: Option<String>,

        /// Overwrite an existing configuration and reset the record
        #[arg(long)]
        force: bool,
    },
    /// Show today's usage
    Status,
    /// Change the daily limit
    SetLimit {
        /// New daily limit in minutes (1-1440)
        #[arg(allow_negative_numbers = true)]
        minutes: i64,
    },
    /// Open a tracked session and enforce the limit until interrupted
    Watch {
        /// URL being opened
        #[arg(long, default_value = "https://www.youtube.com/")]
        url: String,

        /// Close the session after this many minutes
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Show usage history and analytics
    History {
        /// Reporting window
        #[arg(long, value_enum, default_value_t = Period::Weekly)]
        period: Period,
    },
    /// Sign out and remove the local account configuration
    Logout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_limit_with_negative_minutes() {
        let args = Args::try_parse_from(["yt-limiter", "set-limit", "-5"]).unwrap();
        assert!(matches!(args.command, Commands::SetLimit { minutes: -5 }));
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["yt-limiter", "status", "--verbose", "--config", "/tmp/c.toml"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.toml")));
    }

    #[test]
    fn history_defaults_to_weekly() {
        let args = Args::try_parse_from(["yt-limiter", "history"]).unwrap();
        assert!(matches!(args.command, Commands::History { period: Period::Weekly }));

        let args = Args::try_parse_from(["yt-limiter", "history", "--period", "monthly"]).unwrap();
        assert!(matches!(args.command, Commands::History { period: Period::Monthly }));
    }

    #[test]
    fn init_requires_email() {
        assert!(Args::try_parse_from(["yt-limiter", "init"]).is_err());

        let args = Args::try_parse_from(["yt-limiter", "init", "--email", "kid@example.com"]).unwrap();
        match args.command {
            Commands::Init { email, limit, user_id, force } => {
                assert_eq!(email, "kid@example.com");
                assert_eq!(limit, 120);
                assert_eq!(user_id, None);
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
