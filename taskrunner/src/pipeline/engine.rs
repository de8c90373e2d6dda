//! Phase sequencing: Setup once, Iterate until done, Teardown always.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info, instrument, warn};

use crate::core::repair::{RepairOutcome, RepairStages, repair};
use crate::core::signal::{Control, StageSignal};
use crate::io::config::{ConfigError, PipelineConfig, RunConfig};
use crate::pipeline::context::{HaltReason, Phase, RunContext, StopReason};
use crate::pipeline::registry::StageRegistry;

/// Loop limits and failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnginePolicy {
    pub max_iterations: u32,
    pub stop_on_failure: bool,
    pub repair_enabled: bool,
    /// Act invocations per item, initial act included.
    pub max_attempts: u32,
}

impl EnginePolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            stop_on_failure: config.stop_on_failure,
            repair_enabled: config.repair.enabled,
            max_attempts: config.repair.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub iterations: u32,
    pub stop: StopReason,
}

enum Recovery {
    Repaired,
    Discarded,
    Halt,
}

#[derive(Debug)]
pub struct PipelineEngine {
    pipeline: PipelineConfig,
    policy: EnginePolicy,
    registry: StageRegistry,
}

impl PipelineEngine {
    /// Every phase entry and role must name a registered stage.
    pub fn new(
        pipeline: PipelineConfig,
        policy: EnginePolicy,
        registry: StageRegistry,
    ) -> Result<Self, ConfigError> {
        let phases = [
            ("setup", &pipeline.setup),
            ("iterate", &pipeline.iterate),
            ("teardown", &pipeline.teardown),
        ];
        for (phase, names) in phases {
            if let Some(name) = names.iter().find(|name| !registry.contains(name)) {
                return Err(ConfigError::UnknownStage {
                    phase: phase.to_string(),
                    name: name.clone(),
                });
            }
        }
        for (role, name) in [
            ("select", &pipeline.select_stage),
            ("act", &pipeline.act_stage),
            ("verify", &pipeline.verify_stage),
        ] {
            if !registry.contains(name) {
                return Err(ConfigError::UnknownStage {
                    phase: role.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(Self {
            pipeline,
            policy,
            registry,
        })
    }

    pub fn from_config(config: &RunConfig, registry: StageRegistry) -> Result<Self, ConfigError> {
        Self::new(
            config.pipeline.clone(),
            EnginePolicy::from_config(config),
            registry,
        )
    }

    #[instrument(skip_all, fields(max_iterations = self.policy.max_iterations))]
    pub fn run(&self, ctx: &mut RunContext) -> RunOutcome {
        ctx.more_work = true;
        let mut stop = None;

        for name in &self.pipeline.setup {
            if self.dispatch(ctx, name).is_halt() {
                stop = Some(self.halted(ctx, Phase::Setup, name));
                break;
            }
        }

        let mut iterations = 0;
        if stop.is_none() {
            while ctx.more_work && iterations < self.policy.max_iterations {
                iterations += 1;
                ctx.iterations = iterations;
                debug!(iteration = iterations, "iteration start");
                if let Some(stage) = self.run_iteration(ctx) {
                    stop = Some(self.halted(ctx, Phase::Iterate, &stage));
                    break;
                }
            }
        }
        let stop = stop.unwrap_or_else(|| {
            if ctx.more_work {
                warn!(
                    max_iterations = self.policy.max_iterations,
                    "iteration limit reached with work remaining"
                );
                StopReason::IterationLimit {
                    max_iterations: self.policy.max_iterations,
                }
            } else {
                StopReason::Complete
            }
        });
        ctx.stop = Some(stop.clone());

        for name in &self.pipeline.teardown {
            // Best effort: a failing teardown stage never stops the others.
            self.dispatch(ctx, name);
        }

        info!(iterations, stop = %stop, "run finished");
        RunOutcome { iterations, stop }
    }

    fn halted(&self, ctx: &RunContext, phase: Phase, stage: &str) -> StopReason {
        let reason = ctx.halt.clone().unwrap_or_else(|| HaltReason::StageHalted {
            stage: stage.to_string(),
        });
        StopReason::Halted { phase, reason }
    }

    /// One pass over the Iterate list. Returns the halting stage, if any.
    fn run_iteration(&self, ctx: &mut RunContext) -> Option<String> {
        for name in &self.pipeline.iterate {
            let is_act = *name == self.pipeline.act_stage;
            if is_act {
                if let Some(item) = ctx.current_item_mut() {
                    item.attempts += 1;
                }
            }

            let before = ctx.current;
            let signal = self.dispatch(ctx, name);
            if signal.is_halt() {
                return Some(name.clone());
            }
            if *name == self.pipeline.select_stage && ctx.current.is_some() && ctx.current != before
            {
                ctx.reset_item_state();
            }
            if signal.control == Control::SkipRestOfIteration {
                if ctx.current.is_some() && ctx.more_work {
                    ctx.stats.skipped += 1;
                }
                return None;
            }

            if *name == self.pipeline.verify_stage {
                match signal.verification_passed {
                    Some(true) => ctx.verification_feedback.clear(),
                    Some(false) => match self.recover(ctx) {
                        Recovery::Repaired => {}
                        Recovery::Discarded => return None,
                        Recovery::Halt => return Some(ctx.stage.clone()),
                    },
                    None => {}
                }
            }
        }
        None
    }

    /// Handle a failed verification: repair, then fail the item if still
    /// failing.
    fn recover(&self, ctx: &mut RunContext) -> Recovery {
        let item_id = ctx
            .current_item()
            .map(|item| item.id.clone())
            .unwrap_or_default();
        let outcome = if self.policy.repair_enabled {
            let mut driver = RepairDriver { engine: self, ctx };
            repair(&mut driver, self.policy.max_attempts)
        } else {
            RepairOutcome::Exhausted {
                attempts: ctx.current_item().map_or(0, |item| item.attempts),
            }
        };

        match outcome {
            RepairOutcome::Repaired { attempts } => {
                info!(item = %item_id, attempts, "verification passed after repair");
                ctx.verification_feedback.clear();
                Recovery::Repaired
            }
            RepairOutcome::Halted { attempts } => {
                warn!(item = %item_id, attempts, "repair halted");
                Recovery::Halt
            }
            RepairOutcome::Exhausted { attempts } => {
                error!(item = %item_id, attempts, "item failed verification");
                ctx.record_failure(attempts);
                if self.policy.stop_on_failure {
                    ctx.halt_with(HaltReason::ItemFailed { item: item_id });
                    Recovery::Halt
                } else {
                    ctx.current = None;
                    Recovery::Discarded
                }
            }
        }
    }

    /// Run one stage. Errors and panics become a recorded error plus halt.
    fn dispatch(&self, ctx: &mut RunContext, name: &str) -> StageSignal {
        ctx.stage = name.to_string();
        let Some(handler) = self.registry.get(name) else {
            let message = "no registered handler".to_string();
            ctx.record_error(name, message.clone());
            ctx.halt_with(HaltReason::StageFailed {
                stage: name.to_string(),
                message,
            });
            return StageSignal::halt();
        };

        debug!(stage = name, "stage start");
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.run(ctx)));
        let failure = match result {
            Ok(Ok(signal)) => {
                if signal.is_halt() {
                    ctx.halt_with(HaltReason::StageHalted {
                        stage: name.to_string(),
                    });
                }
                return signal;
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        error!(stage = name, error = %failure, "stage failed");
        ctx.record_error(name, failure.clone());
        ctx.halt_with(HaltReason::StageFailed {
            stage: name.to_string(),
            message: failure,
        });
        StageSignal::halt()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drives the configured act and verify stages for the repair loop.
struct RepairDriver<'a> {
    engine: &'a PipelineEngine,
    ctx: &'a mut RunContext,
}

impl RepairStages for RepairDriver<'_> {
    fn attempts(&self) -> u32 {
        self.ctx.current_item().map_or(0, |item| item.attempts)
    }

    fn begin_attempt(&mut self) -> u32 {
        match self.ctx.current_item_mut() {
            Some(item) => {
                item.attempts += 1;
                item.attempts
            }
            None => 0,
        }
    }

    fn act(&mut self) -> Control {
        let name = self.engine.pipeline.act_stage.clone();
        self.engine.dispatch(self.ctx, &name).control
    }

    fn verify(&mut self) -> StageSignal {
        let name = self.engine.pipeline.verify_stage.clone();
        self.engine.dispatch(self.ctx, &name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn proceed(_: &mut RunContext) -> Result<StageSignal> {
        Ok(StageSignal::proceed())
    }

    fn policy() -> EnginePolicy {
        EnginePolicy::from_config(&RunConfig::default())
    }

    #[test]
    fn unregistered_stage_is_rejected_at_construction() {
        let registry = StageRegistry::new()
            .with("select", proceed)
            .with("act", proceed)
            .with("verify", |_: &mut RunContext| -> Result<StageSignal> {
                Ok(StageSignal::verification(true))
            });
        let pipeline = PipelineConfig {
            setup: Vec::new(),
            iterate: vec!["select".to_string(), "deploy".to_string()],
            teardown: Vec::new(),
            select_stage: "select".to_string(),
            act_stage: "act".to_string(),
            verify_stage: "verify".to_string(),
        };
        let err = PipelineEngine::new(pipeline, policy(), registry).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownStage {
                phase: "iterate".to_string(),
                name: "deploy".to_string()
            }
        );
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
