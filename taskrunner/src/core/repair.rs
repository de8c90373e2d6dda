//! Bounded act/verify retry loop.
//!
//! Entered after a verification failure. Each attempt re-runs the act stage
//! (which sees the latest verification feedback) and then verification. The
//! attempt counter is shared with the initial act, so `max_attempts` bounds
//! act invocations for the item as a whole.

use crate::core::signal::{Control, StageSignal};

/// The two stages a repair attempt drives, plus the item's attempt counter.
pub trait RepairStages {
    /// Act invocations so far for the current item.
    fn attempts(&self) -> u32;
    /// Count a new attempt and return the updated total.
    fn begin_attempt(&mut self) -> u32;
    fn act(&mut self) -> Control;
    fn verify(&mut self) -> StageSignal;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Verification passed after `attempts` total act invocations.
    Repaired { attempts: u32 },
    /// Ceiling reached with verification still failing.
    Exhausted { attempts: u32 },
    /// A stage asked to stop the run.
    Halted { attempts: u32 },
}

impl RepairOutcome {
    pub fn attempts(&self) -> u32 {
        match *self {
            Self::Repaired { attempts }
            | Self::Exhausted { attempts }
            | Self::Halted { attempts } => attempts,
        }
    }
}

/// Alternate act and verify until verification passes, a stage halts, or
/// the attempt counter reaches `max_attempts`.
pub fn repair<S: RepairStages>(stages: &mut S, max_attempts: u32) -> RepairOutcome {
    while stages.attempts() < max_attempts {
        let attempts = stages.begin_attempt();
        tracing::info!(attempt = attempts, max_attempts, "repair attempt");

        if stages.act() == Control::HaltAll {
            return RepairOutcome::Halted { attempts };
        }
        let signal = stages.verify();
        if signal.is_halt() {
            return RepairOutcome::Halted { attempts };
        }
        if signal.verification_passed.unwrap_or(false) {
            return RepairOutcome::Repaired { attempts };
        }
    }
    RepairOutcome::Exhausted {
        attempts: stages.attempts(),
    }
}
