//! Stage name -> handler lookup.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::core::signal::StageSignal;
use crate::pipeline::context::RunContext;

/// A named unit of pipeline work.
///
/// `Err` is treated as a stage failure: the engine records it and halts.
pub trait StageHandler {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal>;
}

impl<F> StageHandler for F
where
    F: Fn(&mut RunContext) -> Result<StageSignal>,
{
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        self(ctx)
    }
}

#[derive(Default)]
pub struct StageRegistry {
    handlers: BTreeMap<String, Box<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any earlier one.
    pub fn register(&mut self, name: impl Into<String>, handler: impl StageHandler + 'static) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn with(mut self, name: impl Into<String>, handler: impl StageHandler + 'static) -> Self {
        self.register(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn StageHandler> {
        self.handlers.get(name).map(Box::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
