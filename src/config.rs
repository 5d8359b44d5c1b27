//! Configuration management for lesson-narrator-rs.
//!
//! Loads config from YAML files in standard locations. Every section is
//! optional and falls back to its defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::narration::{DriverSettings, SpeechRate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Kokoro,
    Console,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub engine: EngineKind,
    pub rate: SpeechRate,
    pub pitch: f32,
    pub voice: String,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
    /// Pace of the console engine, per word at rate 1.0.
    pub console_word_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Kokoro,
            rate: SpeechRate::default(),
            pitch: 1.0,
            voice: "af_heart".into(),
            model_path: String::new(),
            voices_path: String::new(),
            tokenizer_path: String::new(),
            console_word_ms: 350,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub idle_reset_ms: u64,
    /// Skip a sentence the engine has not finished after this many seconds.
    pub unit_timeout_secs: Option<u64>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            idle_reset_ms: 2000,
            unit_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8770 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub secret: String,
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://v2.convertapi.com/convert/pdf/to/txt".into(),
            secret: String::new(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub narration: NarrationConfig,
    pub api: ApiConfig,
    pub converter: ConverterConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/lesson-narrator/config.yaml
    /// 3. /etc/lesson-narrator/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/lesson-narrator/config.yaml")),
                Some(PathBuf::from("/etc/lesson-narrator/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            pitch: self.speech.pitch,
            unit_timeout: self.narration.unit_timeout_secs.map(Duration::from_secs),
            idle_reset: Duration::from_millis(self.narration.idle_reset_ms),
        }
    }
}
