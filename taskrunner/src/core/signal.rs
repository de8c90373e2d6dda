//! Control signals returned by pipeline stages.

/// What the engine should do after a stage returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Control {
    #[default]
    Continue,
    /// End the current iteration; the next one starts from the top.
    SkipRestOfIteration,
    /// Stop the run. Teardown still runs.
    HaltAll,
}

/// Stage result: a control decision plus, for verification stages, the
/// pass/fail verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSignal {
    pub control: Control,
    pub verification_passed: Option<bool>,
}

impl StageSignal {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn skip_iteration() -> Self {
        Self {
            control: Control::SkipRestOfIteration,
            verification_passed: None,
        }
    }

    pub fn halt() -> Self {
        Self {
            control: Control::HaltAll,
            verification_passed: None,
        }
    }

    pub fn verification(passed: bool) -> Self {
        Self {
            control: Control::Continue,
            verification_passed: Some(passed),
        }
    }

    pub fn is_halt(&self) -> bool {
        self.control == Control::HaltAll
    }
}
