//! Desktop alerts via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn alert(&self, summary: &str, body: &str) {
        debug!("Alert: {summary}: {body}");
        if !self.enabled {
            return;
        }

        if let Err(e) = Notification::new()
            .appname("Buddy Bot")
            .summary(summary)
            .body(body)
            .icon("audio-speakers")
            .timeout(4000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
