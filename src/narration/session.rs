//! One playback attempt as an explicit state machine.
//!
//! Created → Speaking(0) → Speaking(1) → … → Terminal(Completed | Stopped)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Speaking(usize),
    Terminal(Outcome),
}

/// What the runner should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Speak { index: usize, unit: String },
    Finish(Outcome),
}

/// Cancellation flag shared between a session and whoever may stop it.
/// It only ever goes from false to true.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct NarrationSession {
    id: u64,
    units: Vec<String>,
    next: usize,
    state: SessionState,
    cancel: CancelFlag,
}

impl NarrationSession {
    pub fn new(id: u64, units: Vec<String>) -> Self {
        Self {
            id,
            units,
            next: 0,
            state: SessionState::Created,
            cancel: CancelFlag::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Decide the next transition. Cancellation is only observed here, at
    /// unit boundaries.
    pub fn step(&mut self) -> Step {
        if let SessionState::Terminal(outcome) = self.state {
            return Step::Finish(outcome);
        }

        let outcome = if self.cancel.is_cancelled() {
            Some(Outcome::Stopped)
        } else if self.next >= self.units.len() {
            Some(Outcome::Completed)
        } else {
            None
        };

        match outcome {
            Some(outcome) => {
                self.state = SessionState::Terminal(outcome);
                Step::Finish(outcome)
            }
            None => {
                self.state = SessionState::Speaking(self.next);
                Step::Speak {
                    index: self.next,
                    unit: self.units[self.next].clone(),
                }
            }
        }
    }

    /// The current unit's narration call returned, successfully or not.
    pub fn complete_unit(&mut self) {
        if let SessionState::Speaking(index) = self.state {
            self.next = index + 1;
        }
    }
}
