//! The speech engine seam: speak one sentence unit, stop, list voices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::info;

use super::rate::SpeechRate;

/// Per-call narration options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakOptions {
    pub rate: SpeechRate,
    pub pitch: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            rate: SpeechRate::default(),
            pitch: 1.0,
        }
    }
}

/// Failure of a single unit. The driver skips the unit and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("speech engine not ready: {0}")]
    NotReady(String),
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("audio playback failed: {0}")]
    Playback(String),
    #[error("no completion after {0:?}")]
    TimedOut(Duration),
    #[error("interrupted")]
    Interrupted,
}

/// A host text-to-speech capability.
///
/// `speak` resolves once the unit has been fully spoken, failed, or was cut
/// short by `stop_all`. Calls are made sequentially by the narration driver.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn speak(&self, unit: &str, options: SpeakOptions) -> Result<(), UnitError>;

    /// Best-effort: silence whatever is playing now.
    fn stop_all(&self);

    fn list_voices(&self) -> Vec<String>;
}

/// Fallback engine that logs each unit instead of playing audio.
///
/// Paces itself by word count and rate so sessions take a realistic time.
pub struct ConsoleEngine {
    per_word: Duration,
    speaking: AtomicBool,
    stop: Notify,
}

impl ConsoleEngine {
    pub fn new(per_word: Duration) -> Self {
        Self {
            per_word,
            speaking: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    fn duration_for(&self, unit: &str, rate: SpeechRate) -> Duration {
        let words = unit.split_whitespace().count().max(1) as f32;
        self.per_word.mul_f32(words / rate.value())
    }
}

#[async_trait]
impl SpeechEngine for ConsoleEngine {
    async fn speak(&self, unit: &str, options: SpeakOptions) -> Result<(), UnitError> {
        let stopped = self.stop.notified();
        self.speaking.store(true, Ordering::Relaxed);
        info!("🔊 [{}] {unit}", options.rate);

        let result = tokio::select! {
            _ = tokio::time::sleep(self.duration_for(unit, options.rate)) => Ok(()),
            _ = stopped => Err(UnitError::Interrupted),
        };

        self.speaking.store(false, Ordering::Relaxed);
        result
    }

    fn stop_all(&self) {
        if self.speaking.load(Ordering::Relaxed) {
            info!("Console narration interrupted");
        }
        self.stop.notify_waiters();
    }

    fn list_voices(&self) -> Vec<String> {
        vec!["console".to_string()]
    }
}
