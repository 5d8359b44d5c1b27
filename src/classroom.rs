//! The classroom: lesson text, speech rate and the narration driver behind
//! one set of controls (begin, stop, rate, samples, clear, import).
//!
//! Alerts go to the desktop notifier; document import failures never touch
//! the narration session.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::import::{DocumentImporter, ImportError, ImportedDocument};
use crate::lessons::SampleLesson;
use crate::narration::{
    NarrationDriver, NarrationError, NarrationStatus, SpeakOptions, SpeechRate, UnitError,
};
use crate::notifier::Notifier;

const TEST_PHRASE: &str = "Testing audio. Hello!";

#[derive(Debug, thiserror::Error)]
pub enum ClassroomError {
    #[error(transparent)]
    Narration(#[from] NarrationError),
    #[error("a document is still loading")]
    Loading,
    #[error("a lesson is being narrated; stop it before testing audio")]
    Busy,
    #[error("audio test failed: {0}")]
    Audio(UnitError),
    #[error(transparent)]
    Import(#[from] ImportError),
}

#[derive(Debug, Default)]
struct Lesson {
    text: String,
    source: Option<String>,
}

pub struct Classroom {
    lesson: Mutex<Lesson>,
    rate: Mutex<SpeechRate>,
    loading: AtomicBool,
    driver: NarrationDriver,
    importer: DocumentImporter,
    notifier: Notifier,
}

impl Classroom {
    pub fn new(
        driver: NarrationDriver,
        importer: DocumentImporter,
        notifier: Notifier,
        rate: SpeechRate,
    ) -> Self {
        driver.set_rate(rate);
        Self {
            lesson: Mutex::new(Lesson {
                text: SampleLesson::Welcome.text().to_string(),
                source: None,
            }),
            rate: Mutex::new(rate),
            loading: AtomicBool::new(false),
            driver,
            importer,
            notifier,
        }
    }

    fn lesson(&self) -> std::sync::MutexGuard<'_, Lesson> {
        self.lesson.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn driver(&self) -> &NarrationDriver {
        &self.driver
    }

    pub fn status(&self) -> NarrationStatus {
        self.driver.status()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn lesson_text(&self) -> String {
        self.lesson().text.clone()
    }

    /// Name of the imported document the lesson came from, if any.
    pub fn lesson_source(&self) -> Option<String> {
        self.lesson().source.clone()
    }

    pub fn set_lesson_text(&self, text: impl Into<String>) {
        let mut lesson = self.lesson();
        lesson.text = text.into();
        lesson.source = None;
    }

    pub fn load_sample(&self, sample: SampleLesson) {
        self.set_lesson_text(sample.text());
        info!("Sample lesson loaded: {sample:?}");
    }

    pub fn clear(&self) {
        self.set_lesson_text(String::new());
        info!("Lesson cleared");
    }

    // --- Rate controls ---

    pub fn rate(&self) -> SpeechRate {
        *self.rate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_rate(&self, rate: SpeechRate) -> SpeechRate {
        *self.rate.lock().unwrap_or_else(PoisonError::into_inner) = rate;
        self.driver.set_rate(rate);
        info!("Speech rate: {rate}");
        rate
    }

    pub fn slower(&self) -> SpeechRate {
        self.set_rate(self.rate().slower())
    }

    pub fn faster(&self) -> SpeechRate {
        self.set_rate(self.rate().faster())
    }

    pub fn reset_rate(&self) -> SpeechRate {
        self.set_rate(SpeechRate::default())
    }

    // --- Narration ---

    pub fn start_teaching(&self) -> Result<u64, ClassroomError> {
        if self.is_loading() {
            return Err(ClassroomError::Loading);
        }
        let text = self.lesson_text();
        match self.driver.begin(&text, self.rate()) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.notifier.alert("Error", "Please enter some text!");
                Err(e.into())
            }
        }
    }

    pub fn stop_teaching(&self) {
        self.driver.stop();
    }

    /// Speak a fixed phrase straight through the engine, outside any session.
    /// Refused while a lesson is playing so the two never share the engine.
    pub async fn test_audio(&self) -> Result<(), ClassroomError> {
        if self.driver.is_active() {
            return Err(ClassroomError::Busy);
        }
        let options = SpeakOptions {
            rate: SpeechRate::default(),
            pitch: 1.0,
        };
        match self.driver.engine().speak(TEST_PHRASE, options).await {
            Ok(()) => {
                self.notifier.alert("Success", "Audio working!");
                Ok(())
            }
            Err(e) => {
                warn!("Audio test failed: {e}");
                Err(ClassroomError::Audio(e))
            }
        }
    }

    /// Warn once at startup when the engine has nothing to speak with.
    pub fn check_speech_availability(&self) -> bool {
        let voices = self.driver.engine().list_voices();
        if voices.is_empty() {
            warn!("No speech voices available");
            self.notifier
                .alert("Warning", "No speech voices available on this device.");
            return false;
        }
        info!("{} speech voice(s) available", voices.len());
        true
    }

    // --- Documents ---

    pub async fn import_document(&self, path: &Path) -> Result<ImportedDocument, ClassroomError> {
        if self.loading.swap(true, Ordering::SeqCst) {
            return Err(ClassroomError::Loading);
        }
        let result = self.importer.import(path).await;
        self.loading.store(false, Ordering::SeqCst);

        match result {
            Ok(doc) => {
                info!("Lesson replaced by {} ({:?})", doc.name, doc.kind);
                {
                    let mut lesson = self.lesson();
                    lesson.text = doc.text.clone();
                    lesson.source = Some(doc.name.clone());
                }
                self.notifier.alert(
                    "Lesson loaded",
                    &format!(
                        "{}\n\n{} characters loaded. Ready to teach!",
                        doc.name,
                        doc.text.chars().count()
                    ),
                );
                Ok(doc)
            }
            Err(e) => {
                warn!("Import of {} failed: {e}", path.display());
                self.notifier.alert("Could not read file", &e.to_string());
                Err(e.into())
            }
        }
    }
}
