//! Narration session driver.
//!
//! Owns at most one active session. `begin` supersedes whatever is running,
//! a background runner speaks units strictly one after another, and `stop`
//! cancels cooperatively at the next unit boundary. Every status change is
//! published on a watch channel; per-unit failures go out on a broadcast
//! channel and never end the session.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::engine::{SpeakOptions, SpeechEngine, UnitError};
use super::rate::SpeechRate;
use super::segment::segment;
use super::session::{CancelFlag, NarrationSession, Outcome, Step};
use super::NarrationError;

pub const IDLE_LINE: &str = "Ready to teach";
pub const COMPLETED_LINE: &str = "Lesson Completed";
pub const STOPPED_LINE: &str = "Stopped";

const FAILURE_CHANNEL_CAPACITY: usize = 32;

/// What the driver is doing right now, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NarrationStatus {
    Idle,
    Speaking {
        index: usize,
        total: usize,
        unit: String,
    },
    Completed,
    Stopped,
}

impl NarrationStatus {
    pub fn is_speaking(&self) -> bool {
        matches!(self, Self::Speaking { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

impl fmt::Display for NarrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str(IDLE_LINE),
            Self::Speaking { unit, .. } => f.write_str(unit),
            Self::Completed => f.write_str(COMPLETED_LINE),
            Self::Stopped => f.write_str(STOPPED_LINE),
        }
    }
}

/// A unit that was skipped because the engine reported failure.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub session: u64,
    pub index: usize,
    pub unit: String,
    pub error: UnitError,
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub pitch: f32,
    /// `None` waits for the engine forever.
    pub unit_timeout: Option<Duration>,
    /// Delay before a stopped status falls back to idle.
    pub idle_reset: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            unit_timeout: None,
            idle_reset: Duration::from_secs(2),
        }
    }
}

struct ActiveSession {
    id: u64,
    total: usize,
    cancel: CancelFlag,
}

struct Shared {
    engine: Arc<dyn SpeechEngine>,
    settings: DriverSettings,
    rate: Mutex<SpeechRate>,
    active: Mutex<Option<ActiveSession>>,
    last_id: AtomicU64,
    status: watch::Sender<NarrationStatus>,
    failures: broadcast::Sender<UnitFailure>,
}

fn is_current(active: &Option<ActiveSession>, id: u64) -> bool {
    active.as_ref().is_some_and(|a| a.id == id)
}

impl Shared {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rate(&self) -> SpeechRate {
        *self.rate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the session's step function and publish the new unit if this
    /// session still owns the driver.
    fn advance(&self, session: &mut NarrationSession) -> Step {
        let active = self.lock_active();
        if is_current(&active, session.id()) {
            self.advance_locked(session)
        } else {
            session.step()
        }
    }

    /// Same as `advance`, for a caller that already holds the lock and
    /// knows the session is current.
    fn advance_locked(&self, session: &mut NarrationSession) -> Step {
        let step = session.step();
        if let Step::Speak { index, unit } = &step {
            self.status.send_replace(NarrationStatus::Speaking {
                index: *index,
                total: session.unit_count(),
                unit: unit.clone(),
            });
        }
        step
    }

    async fn speak_unit(&self, session: &NarrationSession, index: usize, unit: &str) {
        let options = SpeakOptions {
            rate: self.rate(),
            pitch: self.settings.pitch,
        };
        let total = session.unit_count();
        debug!("Sentence {}/{total} at {}: {unit}", index + 1, options.rate);

        let call = self.engine.speak(unit, options);
        let result = match self.settings.unit_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    self.engine.stop_all();
                    Err(UnitError::TimedOut(limit))
                }
            },
            None => call.await,
        };

        let Err(error) = result else {
            return;
        };
        if session.is_cancelled() {
            debug!("Sentence {}/{total} cut short: {error}", index + 1);
            return;
        }

        warn!("Skipping sentence {}/{total}: {error}", index + 1);
        let _ = self.failures.send(UnitFailure {
            session: session.id(),
            index,
            unit: unit.to_string(),
            error,
        });
    }

    fn finish(self: &Arc<Self>, session: &NarrationSession, outcome: Outcome) {
        let mut active = self.lock_active();
        if !is_current(&active, session.id()) {
            debug!("Session {} ended after being superseded", session.id());
            return;
        }
        *active = None;

        match outcome {
            Outcome::Completed => {
                info!("Lesson completed ({} sentences)", session.unit_count());
                self.status.send_replace(NarrationStatus::Completed);
            }
            Outcome::Stopped => {
                info!("Lesson stopped");
                self.status.send_replace(NarrationStatus::Stopped);
                drop(active);
                self.schedule_idle_reset(session.id());
            }
        }
    }

    fn schedule_idle_reset(self: &Arc<Self>, id: u64) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.settings.idle_reset).await;
            let active = shared.lock_active();
            if active.is_some() || shared.last_id.load(Ordering::SeqCst) != id {
                return;
            }
            shared.status.send_if_modified(|status| {
                if *status == NarrationStatus::Stopped {
                    *status = NarrationStatus::Idle;
                    true
                } else {
                    false
                }
            });
        });
    }
}

async fn run_session(shared: Arc<Shared>, mut session: NarrationSession, first: Step) {
    let mut step = first;
    loop {
        match step {
            // Stopped or superseded before the unit reached the engine
            Step::Speak { index, .. } if session.is_cancelled() => {
                debug!("Session {} cancelled before sentence {}", session.id(), index + 1);
            }
            Step::Speak { index, unit } => {
                shared.speak_unit(&session, index, &unit).await;
                session.complete_unit();
            }
            Step::Finish(outcome) => {
                debug!("Session {} reached {:?}", session.id(), session.state());
                shared.finish(&session, outcome);
                return;
            }
        }
        step = shared.advance(&mut session);
    }
}

pub struct NarrationDriver {
    shared: Arc<Shared>,
}

impl NarrationDriver {
    pub fn new(engine: Arc<dyn SpeechEngine>, settings: DriverSettings) -> Self {
        let (status, _) = watch::channel(NarrationStatus::Idle);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                engine,
                settings,
                rate: Mutex::new(SpeechRate::default()),
                active: Mutex::new(None),
                last_id: AtomicU64::new(0),
                status,
                failures,
            }),
        }
    }

    pub fn engine(&self) -> Arc<dyn SpeechEngine> {
        Arc::clone(&self.shared.engine)
    }

    pub fn subscribe(&self) -> watch::Receiver<NarrationStatus> {
        self.shared.status.subscribe()
    }

    pub fn status(&self) -> NarrationStatus {
        self.shared.status.borrow().clone()
    }

    /// Units skipped because the engine failed on them.
    pub fn failures(&self) -> broadcast::Receiver<UnitFailure> {
        self.shared.failures.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock_active().is_some()
    }

    pub fn rate(&self) -> SpeechRate {
        self.shared.rate()
    }

    /// Takes effect from the next unit on; a unit already playing keeps its rate.
    pub fn set_rate(&self, rate: SpeechRate) {
        *self.shared.rate.lock().unwrap_or_else(PoisonError::into_inner) = rate;
    }

    /// Start narrating `text`, superseding any active session.
    ///
    /// Returns the new session id as soon as the first unit is published and
    /// handed to the session's runner. Must be called from within a tokio
    /// runtime.
    pub fn begin(&self, text: &str, rate: SpeechRate) -> Result<u64, NarrationError> {
        let units = segment(text);
        if units.is_empty() {
            return Err(NarrationError::EmptyInput);
        }
        self.set_rate(rate);

        let id = self.shared.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut session = NarrationSession::new(id, units);
        let total = session.unit_count();

        let (first, superseded) = {
            let mut active = self.shared.lock_active();
            let previous = active.take();
            if let Some(previous) = &previous {
                previous.cancel.cancel();
            }
            *active = Some(ActiveSession {
                id,
                total,
                cancel: session.cancel_flag(),
            });
            (self.shared.advance_locked(&mut session), previous)
        };

        if let Some(previous) = superseded {
            info!("Session {} superseded by session {id}", previous.id);
            self.shared.engine.stop_all();
        }

        info!("Narrating {total} sentences at {rate}");
        tokio::spawn(run_session(Arc::clone(&self.shared), session, first));
        Ok(id)
    }

    /// Request cancellation of the active session. No-op when idle.
    pub fn stop(&self) {
        let active = self.shared.lock_active();
        let Some(session) = active.as_ref() else {
            debug!("Stop requested with no active session");
            return;
        };
        session.cancel.cancel();
        info!(
            "Stop requested for session {} ({} sentences)",
            session.id, session.total
        );
        drop(active);
        self.shared.engine.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    use super::*;

    const LESSON: &str = "Two plus two equals four.\nPractice makes perfect!";

    struct Call {
        unit: String,
        rate: SpeechRate,
        reply: oneshot::Sender<Result<(), UnitError>>,
    }

    /// Engine whose every unit waits for the test to answer it.
    struct ScriptedEngine {
        calls: mpsc::UnboundedSender<Call>,
        stops: AtomicUsize,
    }

    impl ScriptedEngine {
        fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechEngine for ScriptedEngine {
        async fn speak(&self, unit: &str, options: SpeakOptions) -> Result<(), UnitError> {
            let (reply, answer) = oneshot::channel();
            let _ = self.calls.send(Call {
                unit: unit.to_string(),
                rate: options.rate,
                reply,
            });
            answer.await.unwrap_or(Err(UnitError::Interrupted))
        }

        fn stop_all(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn list_voices(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn scripted(
        settings: DriverSettings,
    ) -> (NarrationDriver, Arc<ScriptedEngine>, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(ScriptedEngine {
            calls: tx,
            stops: AtomicUsize::new(0),
        });
        let driver = NarrationDriver::new(engine.clone(), settings);
        (driver, engine, rx)
    }

    async fn next_status(rx: &mut watch::Receiver<NarrationStatus>) -> NarrationStatus {
        rx.changed().await.unwrap();
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn narrates_lesson_to_completion() {
        let (driver, engine, mut calls) = scripted(DriverSettings::default());
        let mut status = driver.subscribe();

        driver.begin(LESSON, SpeechRate::new(0.9)).unwrap();
        assert_eq!(
            status.borrow_and_update().to_string(),
            "Two plus two equals four."
        );

        let call = calls.recv().await.unwrap();
        assert_eq!(call.unit, "Two plus two equals four.");
        assert_eq!(call.rate, SpeechRate::new(0.9));
        call.reply.send(Ok(())).unwrap();

        assert_eq!(
            next_status(&mut status).await.to_string(),
            "Practice makes perfect!"
        );
        let call = calls.recv().await.unwrap();
        assert_eq!(call.unit, "Practice makes perfect!");
        call.reply.send(Ok(())).unwrap();

        assert_eq!(next_status(&mut status).await, NarrationStatus::Completed);
        assert_eq!(driver.status().to_string(), "Lesson Completed");
        assert!(!driver.is_active());
        assert_eq!(engine.stops(), 0);
    }

    #[tokio::test]
    async fn empty_lesson_is_rejected_without_state_change() {
        let (driver, _engine, mut calls) = scripted(DriverSettings::default());
        driver.set_rate(SpeechRate::new(1.2));

        assert_eq!(driver.begin("", SpeechRate::new(0.5)), Err(NarrationError::EmptyInput));
        assert_eq!(driver.begin("   ", SpeechRate::new(0.5)), Err(NarrationError::EmptyInput));

        assert_eq!(driver.status(), NarrationStatus::Idle);
        assert_eq!(driver.rate(), SpeechRate::new(1.2));
        assert!(!driver.is_active());
        tokio::task::yield_now().await;
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_unit_is_skipped_not_retried() {
        let (driver, _engine, mut calls) = scripted(DriverSettings::default());
        let mut status = driver.subscribe();
        let mut failures = driver.failures();

        let id = driver.begin("One. Two. Three.", SpeechRate::default()).unwrap();
        status.borrow_and_update();

        let call = calls.recv().await.unwrap();
        assert_eq!(call.unit, "One.");
        call.reply.send(Ok(())).unwrap();

        let call = calls.recv().await.unwrap();
        assert_eq!(call.unit, "Two.");
        call.reply
            .send(Err(UnitError::Synthesis("bad phonemes".into())))
            .unwrap();

        let call = calls.recv().await.unwrap();
        assert_eq!(call.unit, "Three.");
        call.reply.send(Ok(())).unwrap();

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.session, id);
        assert_eq!(failure.index, 1);
        assert_eq!(failure.unit, "Two.");

        loop {
            if next_status(&mut status).await == NarrationStatus::Completed {
                break;
            }
        }
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_takes_effect_when_current_unit_returns() {
        let (driver, engine, mut calls) = scripted(DriverSettings::default());
        let mut status = driver.subscribe();

        driver.begin(LESSON, SpeechRate::new(0.9)).unwrap();
        status.borrow_and_update();
        let call = calls.recv().await.unwrap();

        driver.stop();
        assert_eq!(engine.stops(), 1);
        // Terminal status comes from the runner, not from stop() itself.
        assert!(driver.status().is_speaking());

        call.reply.send(Ok(())).unwrap();
        assert_eq!(next_status(&mut status).await, NarrationStatus::Stopped);
        assert_eq!(driver.status().to_string(), "Stopped");

        tokio::task::yield_now().await;
        assert!(calls.try_recv().is_err());
        assert!(!driver.is_active());
    }

    #[tokio::test]
    async fn interrupted_unit_after_stop_is_not_a_failure() {
        let (driver, _engine, mut calls) = scripted(DriverSettings::default());
        let mut failures = driver.failures();
        let mut status = driver.subscribe();

        driver.begin(LESSON, SpeechRate::default()).unwrap();
        status.borrow_and_update();
        let call = calls.recv().await.unwrap();

        driver.stop();
        call.reply.send(Err(UnitError::Interrupted)).unwrap();

        assert_eq!(next_status(&mut status).await, NarrationStatus::Stopped);
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_status_returns_to_idle_after_delay() {
        let (driver, _engine, mut calls) = scripted(DriverSettings::default());
        let mut status = driver.subscribe();

        driver.begin(LESSON, SpeechRate::default()).unwrap();
        status.borrow_and_update();
        let call = calls.recv().await.unwrap();
        driver.stop();
        call.reply.send(Ok(())).unwrap();
        assert_eq!(next_status(&mut status).await, NarrationStatus::Stopped);

        let stopped_at = tokio::time::Instant::now();
        assert_eq!(next_status(&mut status).await, NarrationStatus::Idle);
        assert!(stopped_at.elapsed() >= Duration::from_secs(2));
        assert_eq!(driver.status().to_string(), "Ready to teach");
    }

    #[tokio::test]
    async fn stop_without_session_is_a_no_op() {
        let (driver, engine, _calls) = scripted(DriverSettings::default());
        driver.stop();
        driver.stop();
        assert_eq!(engine.stops(), 0);
        assert_eq!(driver.status(), NarrationStatus::Idle);
    }

    #[tokio::test]
    async fn begin_supersedes_active_session() {
        let (driver, engine, mut calls) = scripted(DriverSettings::default());
        let mut status = driver.subscribe();

        driver.begin("First one. First two.", SpeechRate::default()).unwrap();
        let first = calls.recv().await.unwrap();
        assert_eq!(first.unit, "First one.");

        driver.begin("Second one.", SpeechRate::default()).unwrap();
        status.borrow_and_update();
        assert_eq!(engine.stops(), 1);
        assert_eq!(driver.status().to_string(), "Second one.");

        let second = calls.recv().await.unwrap();
        assert_eq!(second.unit, "Second one.");

        // The old session wakes up cancelled and bows out silently.
        first.reply.send(Ok(())).unwrap();
        second.reply.send(Ok(())).unwrap();

        assert_eq!(next_status(&mut status).await, NarrationStatus::Completed);
        tokio::task::yield_now().await;
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn superseded_session_never_reaches_the_engine() {
        let (driver, engine, mut calls) = scripted(DriverSettings::default());
        let mut status = driver.subscribe();

        // No yield between the two begins: the first runner has not run yet.
        driver.begin("Old one. Old two.", SpeechRate::default()).unwrap();
        driver.begin("New one.", SpeechRate::default()).unwrap();
        assert_eq!(engine.stops(), 1);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let call = calls.recv().await.unwrap();
        assert_eq!(call.unit, "New one.");
        assert!(calls.try_recv().is_err());

        status.borrow_and_update();
        call.reply.send(Ok(())).unwrap();
        assert_eq!(next_status(&mut status).await, NarrationStatus::Completed);
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_before_first_dispatch_sends_nothing() {
        let (driver, engine, mut calls) = scripted(DriverSettings::default());
        let mut status = driver.subscribe();

        driver.begin(LESSON, SpeechRate::default()).unwrap();
        status.borrow_and_update();
        driver.stop();
        assert_eq!(engine.stops(), 1);

        assert_eq!(next_status(&mut status).await, NarrationStatus::Stopped);
        tokio::task::yield_now().await;
        assert!(calls.try_recv().is_err());
        assert!(!driver.is_active());
    }

    #[tokio::test]
    async fn rate_changes_apply_to_following_units() {
        let (driver, _engine, mut calls) = scripted(DriverSettings::default());

        driver.begin(LESSON, SpeechRate::new(0.9)).unwrap();
        let call = calls.recv().await.unwrap();
        assert_eq!(call.rate, SpeechRate::new(0.9));

        driver.set_rate(SpeechRate::new(1.3));
        call.reply.send(Ok(())).unwrap();

        let call = calls.recv().await.unwrap();
        assert_eq!(call.rate, SpeechRate::new(1.3));
        call.reply.send(Ok(())).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unit_timeout_skips_a_stalled_unit() {
        let settings = DriverSettings {
            unit_timeout: Some(Duration::from_secs(5)),
            ..DriverSettings::default()
        };
        let (driver, engine, mut calls) = scripted(settings);
        let mut failures = driver.failures();

        driver.begin(LESSON, SpeechRate::default()).unwrap();
        let stalled = calls.recv().await.unwrap();
        assert_eq!(stalled.unit, "Two plus two equals four.");

        let next = calls.recv().await.unwrap();
        assert_eq!(next.unit, "Practice makes perfect!");
        assert_eq!(engine.stops(), 1);

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.index, 0);
        assert_eq!(failure.error, UnitError::TimedOut(Duration::from_secs(5)));
        drop(stalled);
    }

    #[test]
    fn status_lines_match_display_text() {
        assert_eq!(NarrationStatus::Idle.to_string(), "Ready to teach");
        assert_eq!(NarrationStatus::Completed.to_string(), "Lesson Completed");
        assert_eq!(NarrationStatus::Stopped.to_string(), "Stopped");
        assert!(NarrationStatus::Stopped.is_terminal());
        assert!(!NarrationStatus::Idle.is_terminal());
    }
}
