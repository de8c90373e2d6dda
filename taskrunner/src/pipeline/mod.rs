//! Configurable stage pipeline: context, registry, engine and the built-in
//! stages.

pub mod context;
pub mod engine;
pub mod registry;
pub mod stages;

use std::path::Path;

use anyhow::Result;

use crate::io::config::RunConfig;
use context::RunContext;
use engine::{PipelineEngine, RunOutcome};

/// Run the configured pipeline with the built-in stages.
pub fn run_pipeline(root: &Path, config: RunConfig) -> Result<(RunContext, RunOutcome)> {
    let registry = stages::builtin_registry(&config)?;
    let engine = PipelineEngine::from_config(&config, registry)?;
    let mut ctx = RunContext::new(root, config)?;
    let outcome = engine.run(&mut ctx);
    Ok((ctx, outcome))
}
