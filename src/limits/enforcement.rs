use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events the monitor sends to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Cover the restricted site with the "time's up" overlay
    ShowBlockOverlay { limit_minutes: u32 },
    HideBlockOverlay,
    UpdateProgress { percent_used: f64 },
    /// Pause every playing media element on the page
    PauseMedia,
    /// Usage could not be saved for several flushes in a row
    SyncDegraded { consecutive_failures: u32 },
}

/// Presentation layer receiving enforcement events
pub trait UiSurface: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Surface that only logs; used when nothing renders the overlay
pub struct TracingSurface;

impl UiSurface for TracingSurface {
    fn emit(&self, event: UiEvent) {
        match event {
            UiEvent::ShowBlockOverlay { limit_minutes } => {
                info!("Daily limit of {} minutes reached; site blocked", limit_minutes)
            }
            UiEvent::HideBlockOverlay => info!("Site unblocked"),
            UiEvent::UpdateProgress { percent_used } => {
                tracing::debug!("Usage at {:.0}% of daily limit", percent_used)
            }
            UiEvent::PauseMedia => info!("Pausing media playback"),
            UiEvent::SyncDegraded { consecutive_failures } => warn!(
                "Usage could not be saved ({} attempts in a row)",
                consecutive_failures
            ),
        }
    }
}

/// Logs every event and raises a desktop notification for the ones the user must see
pub struct NotifyingSurface;

impl NotifyingSurface {
    fn send_system_notification(&self, title: &str, message: &str) {
        if let Err(e) = Self::notify(title, message) {
            warn!("Failed to show notification: {:#}", e);
        }
    }

    fn notify(title: &str, message: &str) -> std::io::Result<()> {
        #[cfg(target_os = "linux")]
        {
            use std::process::Command;
            Command::new("notify-send")
                .arg(title)
                .arg(message)
                .arg("--urgency=critical")
                .arg("--icon=dialog-warning")
                .output()?;
        }

        #[cfg(target_os = "macos")]
        {
            use std::process::Command;
            let script = format!(
                "display notification \"{}\" with title \"{}\" sound name \"Glass\"",
                message, title
            );
            Command::new("osascript").arg("-e").arg(&script).output()?;
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            warn!("Notification: {} - {}", title, message);
        }

        Ok(())
    }
}

impl UiSurface for NotifyingSurface {
    fn emit(&self, event: UiEvent) {
        match &event {
            UiEvent::ShowBlockOverlay { limit_minutes } => self.send_system_notification(
                "Time's Up!",
                &format!(
                    "You've reached your daily YouTube limit of {} minutes. \
                     YouTube will be available again after midnight.",
                    limit_minutes
                ),
            ),
            UiEvent::SyncDegraded { .. } => self.send_system_notification(
                "Usage not saved",
                "Watch time could not be saved. It will be retried automatically.",
            ),
            _ => {}
        }
        TracingSurface.emit(event);
    }
}

/// Forwards events over a channel to a UI task
pub struct ChannelSurface {
    sender: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl UiSurface for ChannelSurface {
    fn emit(&self, event: UiEvent) {
        // A closed receiver means the UI is gone; enforcement carries on regardless
        let _ = self.sender.send(event);
    }
}

/// Delivers every event to several surfaces in order
pub struct FanoutSurface {
    surfaces: Vec<Arc<dyn UiSurface>>,
}

impl FanoutSurface {
    pub fn new(surfaces: Vec<Arc<dyn UiSurface>>) -> Self {
        Self { surfaces }
    }
}

impl UiSurface for FanoutSurface {
    fn emit(&self, event: UiEvent) {
        for surface in &self.surfaces {
            surface.emit(event.clone());
        }
    }
}

/// Keeps every event; handy for assertions
#[derive(Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events other than progress updates
    pub fn transitions(&self) -> Vec<UiEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, UiEvent::UpdateProgress { .. }))
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl UiSurface for RecordingSurface {
    fn emit(&self, event: UiEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_surface_forwards_events() {
        let (surface, mut receiver) = ChannelSurface::new();
        surface.emit(UiEvent::PauseMedia);
        surface.emit(UiEvent::ShowBlockOverlay { limit_minutes: 120 });

        assert_eq!(receiver.try_recv().unwrap(), UiEvent::PauseMedia);
        assert_eq!(
            receiver.try_recv().unwrap(),
            UiEvent::ShowBlockOverlay { limit_minutes: 120 }
        );
    }

    #[test]
    fn channel_surface_ignores_closed_receiver() {
        let (surface, receiver) = ChannelSurface::new();
        drop(receiver);
        surface.emit(UiEvent::HideBlockOverlay);
    }

    #[test]
    fn recording_surface_filters_progress() {
        let surface = RecordingSurface::new();
        surface.emit(UiEvent::UpdateProgress { percent_used: 10.0 });
        surface.emit(UiEvent::HideBlockOverlay);

        assert_eq!(surface.events().len(), 2);
        assert_eq!(surface.transitions(), vec![UiEvent::HideBlockOverlay]);

        surface.clear();
        assert!(surface.events().is_empty());
    }

    #[test]
    fn fanout_reaches_every_surface() {
        let first = Arc::new(RecordingSurface::new());
        let second = Arc::new(RecordingSurface::new());
        let surfaces: Vec<Arc<dyn UiSurface>> = vec![first.clone(), second.clone()];
        let fanout = FanoutSurface::new(surfaces);

        fanout.emit(UiEvent::PauseMedia);

        assert_eq!(first.events(), vec![UiEvent::PauseMedia]);
        assert_eq!(second.events(), vec![UiEvent::PauseMedia]);
    }
}
