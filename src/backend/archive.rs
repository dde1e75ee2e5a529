use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::fs::atomic_write;
use crate::limits::history::{DayRecord, UsageHistory, HISTORY_VERSION};

/// Receiver of finished-day totals
pub trait UsageArchive: Send + Sync {
    fn archive(&self, record: DayRecord) -> Result<()>;

    /// Snapshot of everything archived so far
    fn history(&self) -> Result<UsageHistory>;
}

/// Archive kept in memory
#[derive(Default)]
pub struct MemoryUsageArchive {
    history: Mutex<UsageHistory>,
}

impl MemoryUsageArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageArchive for MemoryUsageArchive {
    fn archive(&self, record: DayRecord) -> Result<()> {
        self.history
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?
            .add_record(record);
        Ok(())
    }

    fn history(&self) -> Result<UsageHistory> {
        Ok(self
            .history
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?
            .clone())
    }
}

/// Archive persisted as a JSON history file
pub struct FileUsageArchive {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileUsageArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<UsageHistory> {
        if !self.path.exists() {
            return Ok(UsageHistory::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read history file: {}", self.path.display()))?;

        let history: UsageHistory = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file: {}", self.path.display()))?;

        if history.version != HISTORY_VERSION {
            tracing::warn!(
                "History file version mismatch (expected {}, got {}). Starting a new history.",
                HISTORY_VERSION,
                history.version
            );
            return Ok(UsageHistory::new());
        }

        Ok(history)
    }

    fn save(&self, history: &UsageHistory) -> Result<()> {
        let content = serde_json::to_string_pretty(history)
            .context("Failed to serialize history")?;

        atomic_write(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write history file: {}", self.path.display()))
    }
}

impl UsageArchive for FileUsageArchive {
    fn archive(&self, record: DayRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("history lock poisoned"))?;

        let mut history = self.load()?;
        history.add_record(record);
        self.save(&history)
    }

    fn history(&self) -> Result<UsageHistory> {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::record::UserId;
    use chrono::NaiveDate;

    fn record(date: &str, usage: u64) -> DayRecord {
        DayRecord {
            user_id: UserId::new("u1"),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            usage_seconds: usage,
            limit_seconds: 7200,
        }
    }

    #[test]
    fn file_archive_roundtrips_history() {
        let temp_dir = tempfile::tempdir().unwrap();
        let archive = FileUsageArchive::new(temp_dir.path().join("history.json"));

        archive.archive(record("2024-01-01", 3600)).unwrap();
        archive.archive(record("2024-01-02", 1800)).unwrap();

        let reopened = FileUsageArchive::new(archive.path());
        let history = reopened.history().unwrap();
        assert_eq!(history.records.len(), 2);
        assert_eq!(history.records[0].usage_seconds, 1800);
    }

    #[test]
    fn file_archive_without_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let archive = FileUsageArchive::new(temp_dir.path().join("history.json"));
        assert!(archive.history().unwrap().records.is_empty());
    }

    #[test]
    fn memory_archive_collects_records() {
        let archive = MemoryUsageArchive::new();
        archive.archive(record("2024-01-01", 60)).unwrap();
        assert_eq!(archive.history().unwrap().records.len(), 1);
    }
}
