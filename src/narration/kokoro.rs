//! Kokoro TTS engine: one sentence unit → phonemes → ONNX inference → playback.
//!
//! Pipeline per unit:
//! 1. Unit → phonemes (misaki-rs G2P)
//! 2. Phonemes → token IDs (tokenizer.json vocabulary)
//! 3. Token IDs + voice style + rate → ONNX inference → f32 audio (24kHz)
//! 4. Audio → rodio Sink playback, stoppable through `stop_all`

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::engine::{SpeakOptions, SpeechEngine, UnitError};
use crate::config::SpeechConfig;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension
const STYLE_DIM: usize = 256;

/// Loaded voice style data: shape (510, 256) f32, indexed by token count.
struct VoiceData {
    styles: Array2<f32>,
}

pub struct KokoroTtsEngine {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<Option<ort::session::Session>>,
    phonemizer: Option<misaki_rs::G2P>,
    vocab: HashMap<char, i64>,
    voices: HashMap<String, VoiceData>,
    voice: String,

    // In rodio 0.21, OutputStream is the handle; kept alive for the process
    output_stream: Option<OutputStream>,

    /// Bumped by every `stop_all`; a call is stopped once it moves past
    /// the value seen when the call was made.
    stop_generation: Arc<AtomicU64>,
    speak_lock: AsyncMutex<()>,
    active_sink: Arc<Mutex<Option<Sink>>>,

    model_path: PathBuf,
    voices_path: PathBuf,
    tokenizer_path: PathBuf,
}

fn resolve(configured: &str, base_dir: &Path, default_name: &str) -> PathBuf {
    if configured.is_empty() {
        base_dir.join(default_name)
    } else {
        PathBuf::from(configured)
    }
}

impl KokoroTtsEngine {
    pub fn new(config: &SpeechConfig) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_default();

        Self {
            session: Mutex::new(None),
            phonemizer: None,
            vocab: HashMap::new(),
            voices: HashMap::new(),
            voice: config.voice.clone(),
            output_stream: None,
            stop_generation: Arc::new(AtomicU64::new(0)),
            speak_lock: AsyncMutex::new(()),
            active_sink: Arc::new(Mutex::new(None)),
            model_path: resolve(&config.model_path, &base_dir, "kokoro-v1.0.onnx"),
            voices_path: resolve(&config.voices_path, &base_dir, "voices-v1.0.bin"),
            tokenizer_path: resolve(&config.tokenizer_path, &base_dir, "tokenizer.json"),
        }
    }

    /// Load the ONNX model, tokenizer, voices, phonemizer and audio output.
    /// Blocking; call once at startup.
    pub fn load_model_sync(&mut self) -> Result<(), String> {
        let t0 = Instant::now();

        info!("Loading tokenizer from {}", self.tokenizer_path.display());
        self.vocab = load_tokenizer(&self.tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", self.vocab.len());

        info!("Loading voices from {}", self.voices_path.display());
        self.voices = load_voices(&self.voices_path)?;
        info!("Loaded {} voices", self.voices.len());
        if !self.voices.contains_key(&self.voice) {
            return Err(format!("Configured voice not found: {}", self.voice));
        }

        info!("Loading ONNX model from {}", self.model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create ONNX session builder: {e}"))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| format!("Failed to set optimization level: {e}"))?
            .with_intra_threads(4)
            .map_err(|e| format!("Failed to set thread count: {e}"))?
            .commit_from_file(&self.model_path)
            .map_err(|e| format!("Failed to load ONNX model: {e}"))?;
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);

        info!("Initializing misaki-rs phonemizer...");
        self.phonemizer = Some(misaki_rs::G2P::new(misaki_rs::Language::EnglishUS));

        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to open audio output: {e}"))?;
        self.output_stream = Some(stream);

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());
        Ok(())
    }

    /// Generate audio samples for one unit at the given speed.
    fn generate_audio(&self, text: &str, speed: f32) -> Result<Vec<f32>, UnitError> {
        let mut session_guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let session = session_guard
            .as_mut()
            .ok_or_else(|| UnitError::NotReady("model not loaded".into()))?;
        let phonemizer = self
            .phonemizer
            .as_ref()
            .ok_or_else(|| UnitError::NotReady("phonemizer not loaded".into()))?;

        let (phonemes, _tokens) = phonemizer
            .g2p(text)
            .map_err(|e| UnitError::Synthesis(format!("phonemization failed: {e}")))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // Padding token 0 on both ends; unknown phoneme characters are dropped
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0);
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0);

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        let voice_data = self
            .voices
            .get(&self.voice)
            .ok_or_else(|| UnitError::NotReady(format!("voice not found: {}", self.voice)))?;
        let style_idx = n_tokens.saturating_sub(2).min(voice_data.styles.nrows() - 1);
        let style_vec: Vec<f32> = voice_data.styles.row(style_idx).to_vec();

        let synthesis = |e: ort::Error| UnitError::Synthesis(e.to_string());

        let tokens_array = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| UnitError::Synthesis(format!("tokens tensor: {e}")))?;
        let tokens_tensor = Tensor::from_array(tokens_array).map_err(synthesis)?;

        let style_array = Array2::from_shape_vec((1, STYLE_DIM), style_vec)
            .map_err(|e| UnitError::Synthesis(format!("style tensor: {e}")))?;
        let style_tensor = Tensor::from_array(style_array).map_err(synthesis)?;

        let speed_tensor =
            Tensor::from_array(ndarray::Array1::from_vec(vec![speed])).map_err(synthesis)?;

        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(synthesis)?;

        // ort 2.0: try_extract_tensor returns (&Shape, &[T])
        let first_output = outputs
            .iter()
            .next()
            .ok_or_else(|| UnitError::Synthesis("no output tensor from model".into()))?;
        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(synthesis)?;

        let samples: Vec<f32> = audio_slice.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );
        Ok(samples)
    }

    fn stopped_since(&self, generation: u64) -> bool {
        self.stop_generation.load(Ordering::SeqCst) != generation
    }

    /// Play samples through rodio. Returns true if stopped during playback.
    async fn play_audio(&self, samples: Vec<f32>, generation: u64) -> Result<bool, UnitError> {
        let stream = self
            .output_stream
            .as_ref()
            .ok_or_else(|| UnitError::Playback("no audio output stream".into()))?;

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(stream.mixer());
        sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));
        *self.active_sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);

        let stop_generation = self.stop_generation.clone();
        let active_sink = self.active_sink.clone();

        let was_cancelled = tokio::task::spawn_blocking(move || loop {
            let is_empty = active_sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .map_or(true, Sink::empty);
            if is_empty {
                return false;
            }

            if stop_generation.load(Ordering::SeqCst) != generation {
                if let Some(sink) = active_sink.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    sink.stop();
                }
                return true;
            }

            std::thread::sleep(std::time::Duration::from_millis(50));
        })
        .await
        .map_err(|e| UnitError::Playback(format!("playback task failed: {e}")))?;

        *self.active_sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(was_cancelled)
    }
}

#[async_trait]
impl SpeechEngine for KokoroTtsEngine {
    async fn speak(&self, unit: &str, options: SpeakOptions) -> Result<(), UnitError> {
        let generation = self.stop_generation.load(Ordering::SeqCst);
        let _guard = self.speak_lock.lock().await;
        if self.stopped_since(generation) {
            return Err(UnitError::Interrupted);
        }

        if (options.pitch - 1.0).abs() > f32::EPSILON {
            debug!("Kokoro has no pitch control, ignoring pitch {}", options.pitch);
        }

        let t_gen = Instant::now();
        let samples = self.generate_audio(unit, options.rate.value())?;
        let gen_ms = t_gen.elapsed().as_secs_f64() * 1000.0;

        if self.stopped_since(generation) {
            return Err(UnitError::Interrupted);
        }
        if samples.is_empty() {
            return Ok(());
        }

        let t_play = Instant::now();
        if self.play_audio(samples, generation).await? {
            return Err(UnitError::Interrupted);
        }
        debug!(
            "Unit spoken: gen={gen_ms:.0}ms play={:.1}s",
            t_play.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn stop_all(&self) {
        self.stop_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(sink) = self.active_sink.lock().unwrap_or_else(PoisonError::into_inner).take() {
            sink.stop();
        }
        info!("Kokoro playback stopped");
    }

    fn list_voices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.voices.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("Failed to read tokenizer: {e}"))?;
    parse_tokenizer(&contents)
}

fn parse_tokenizer(contents: &str) -> Result<HashMap<char, i64>, String> {
    let data: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| format!("Failed to parse tokenizer JSON: {e}"))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or("Missing model.vocab in tokenizer.json")?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id.as_i64().ok_or("Token ID is not an integer")?;
        // Each token is a single phoneme character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }
    Ok(map)
}

/// Load all voice styles from an NPZ file.
fn load_voices(path: &Path) -> Result<HashMap<String, VoiceData>, String> {
    let file = fs::File::open(path).map_err(|e| format!("Failed to open voices file: {e}"))?;
    let mut npz =
        NpzReader::new(file).map_err(|e| format!("Failed to read NPZ voices file: {e}"))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| format!("Failed to list NPZ entries: {e}"))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in names {
        let arr: Array3<f32> = npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| format!("Failed to read voice '{name}': {e}"))?;

        // (510, 1, 256) → (510, 256)
        let (dim0, dim2) = (arr.shape()[0], arr.shape()[2]);
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| format!("Failed to reshape voice '{name}': {e}"))?;

        voices.insert(name, VoiceData { styles });
    }
    Ok(voices)
}
