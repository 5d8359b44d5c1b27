//! Lesson narration: segmentation, the session state machine, and the
//! driver that feeds sentence units to a speech engine one at a time.
//!
//! Components:
//! - `segment`: lesson text → ordered sentence units
//! - `rate`: bounded speech rate
//! - `session`: one playback attempt as an explicit state machine
//! - `driver`: begin/stop, status observation, per-unit failure recovery
//! - `engine`: the speech engine trait plus a console fallback
//! - `kokoro`: Kokoro ONNX model inference + rodio playback

pub mod driver;
pub mod engine;
pub mod kokoro;
pub mod rate;
pub mod segment;
pub mod session;

pub use driver::{DriverSettings, NarrationDriver, NarrationStatus};
pub use engine::{ConsoleEngine, SpeakOptions, SpeechEngine, UnitError};
pub use rate::SpeechRate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NarrationError {
    #[error("nothing to narrate: the lesson has no sentences")]
    EmptyInput,
}
