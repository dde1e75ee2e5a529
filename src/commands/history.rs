use anyhow::{Context, Result};
use std::path::PathBuf;

use super::Workspace;
use super::utils::{format_duration_short, init_logging, progress_bar};
use crate::backend::{AccountStore, UsageArchive};
use crate::limits::history::{Period, UsageHistory, UsageSummary};
use crate::limits::record::{UserId, local_today};

/// Show usage history and analytics
pub fn history(config_path: Option<PathBuf>, period: Period, verbose: bool) -> Result<()> {
    let workspace = Workspace::open(config_path)?;
    init_logging(verbose, &workspace.config.logging)?;

    let user_id = workspace.user_id();
    let history = workspace.archive.history().context("Failed to read usage history")?;
    let summary = history.summary(&user_id, period);

    println!("Usage Analytics (last {})", period.label());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Today's running total is still in the live record
    if let Ok(record) = workspace.store.get_record(&user_id) {
        if record.last_reset_date == local_today() {
            println!("Today so far:   {}", format_duration_short(record.current_usage_seconds));
        }
    }

    print!("{}", render_summary(&summary));
    println!();
    print!("{}", render_days(&history, &user_id, period));

    Ok(())
}

fn render_summary(summary: &UsageSummary) -> String {
    format!(
        "Total:          {}\nDaily average:  {}\nOf limit:       {:.0}% over {} day(s)\n",
        format_duration_short(summary.total_seconds),
        format_duration_short(summary.average_seconds),
        summary.limit_used_percent,
        summary.days
    )
}

fn render_days(history: &UsageHistory, user_id: &UserId, period: Period) -> String {
    let days = history.user_records(user_id, period.days());
    if days.is_empty() {
        return "No finished days recorded yet.\n".to_string();
    }

    days.iter()
        .map(|day| {
            let percent = day.percent_of_limit();
            format!(
                "{}  {} {:>3.0}%  {}\n",
                day.date.format("%a %b %e"),
                progress_bar(percent, 20),
                percent,
                format_duration_short(day.usage_seconds)
            )
        })
        .collect()
}
