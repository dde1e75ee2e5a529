use chrono::{DateTime, Duration, Local};
use tokio::time::Instant;

/// Wall-clock source for the tracker
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Wall time that advances with tokio's clock from a fixed starting point.
///
/// Under a paused runtime `tokio::time::advance` moves it forward.
pub struct AnchoredClock {
    start: DateTime<Local>,
    anchor: Instant,
}

impl AnchoredClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            start,
            anchor: Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = Duration::from_std(self.anchor.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.start.checked_add_signed(elapsed).unwrap_or(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn anchored_clock_follows_tokio_time() {
        let start = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = AnchoredClock::new(start);
        assert_eq!(clock.now(), start);

        tokio::time::advance(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }
}
