//! Usage accounting and enforcement
//!
//! `record` and `ledger` hold the per-user usage document and the rules that
//! change it, `monitor` decides tracking and blocking, and `tracker` drives
//! the monitor from timers, window liveness and remote updates.

pub mod clock;
pub mod enforcement;
pub mod history;
pub mod ledger;
pub mod monitor;
pub mod record;
pub mod tracker;

pub use clock::{AnchoredClock, Clock, SystemClock};
pub use enforcement::{UiEvent, UiSurface};
pub use ledger::UsageLedger;
pub use monitor::{AccessDecision, EnforcementMonitor, MonitorState, MonitorStatus};
pub use record::{RecordPatch, UserId, UserUsageRecord};
pub use tracker::{SiteWindow, TrackerSettings, UsageTracker, WindowFlag};
