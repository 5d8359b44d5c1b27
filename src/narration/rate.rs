//! Speech rate shared by the narration driver and its controls.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Narration speed multiplier, always within `[MIN, MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct SpeechRate(f32);

impl SpeechRate {
    pub const MIN: f32 = 0.5;
    pub const MAX: f32 = 1.5;
    pub const DEFAULT: f32 = 0.9;
    pub const STEP: f32 = 0.1;

    pub fn new(value: f32) -> Self {
        if !value.is_finite() {
            return Self::default();
        }
        // One decimal place, so repeated steps land on 0.5, 0.6, ...
        let rounded = (value * 10.0).round() / 10.0;
        Self(rounded.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn slower(self) -> Self {
        Self::new(self.0 - Self::STEP)
    }

    pub fn faster(self) -> Self {
        Self::new(self.0 + Self::STEP)
    }
}

impl Default for SpeechRate {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl From<f32> for SpeechRate {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl From<SpeechRate> for f32 {
    fn from(rate: SpeechRate) -> Self {
        rate.0
    }
}

impl fmt::Display for SpeechRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}x", self.0)
    }
}
