//! Test-only helpers: work item builders and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Result, bail};

use crate::core::types::{ItemStatus, WorkItem};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::config::RunConfig;
use crate::io::verify::{CheckOutcome, CheckStatus, VerifyReport, VerifyRequest, Verifier};
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::stages::{AgentStage, VerifyStage, builtin_registry};

/// Pending item with item-level dependencies.
pub fn item(id: &str, deps: &[&str]) -> WorkItem {
    let mut item = WorkItem::new(id, format!("{id} title"), ItemStatus::Pending);
    item.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
    item
}

/// Done item with no dependencies.
pub fn done_item(id: &str) -> WorkItem {
    WorkItem::new(id, format!("{id} title"), ItemStatus::Done)
}

/// Write `tasks.md` under `root`.
pub fn write_tasks(root: &Path, content: &str) {
    fs::write(root.join("tasks.md"), content).expect("write tasks.md");
}

/// Agent that records requests and optionally fails on given attempts.
#[derive(Clone, Default)]
pub struct ScriptedAgent {
    pub requests: Rc<RefCell<Vec<AgentRequest>>>,
    pub fail_on_attempt: Option<u32>,
}

impl ScriptedAgent {
    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke(&self, request: &AgentRequest) -> Result<()> {
        self.requests.borrow_mut().push(request.clone());
        if self.fail_on_attempt == Some(request.attempt) {
            bail!("scripted agent failure on attempt {}", request.attempt);
        }
        Ok(())
    }
}

/// Verifier returning queued verdicts; passes once the queue is empty.
#[derive(Clone, Default)]
pub struct ScriptedVerifier {
    verdicts: Rc<RefCell<VecDeque<bool>>>,
    pub calls: Rc<RefCell<u32>>,
}

impl ScriptedVerifier {
    pub fn new(verdicts: &[bool]) -> Self {
        Self {
            verdicts: Rc::new(RefCell::new(verdicts.iter().copied().collect())),
            calls: Rc::default(),
        }
    }

    /// Fails every call.
    pub fn always_failing() -> Self {
        Self::new(&[false; 64])
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.borrow()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyReport> {
        *self.calls.borrow_mut() += 1;
        let passed = self.verdicts.borrow_mut().pop_front().unwrap_or(true);
        let command = request
            .checks
            .first()
            .map(|check| check.command.clone())
            .unwrap_or_else(|| "scripted".to_string());
        Ok(VerifyReport::from_checks(vec![CheckOutcome {
            name: "test".to_string(),
            command,
            required: true,
            status: if passed {
                CheckStatus::Passed
            } else {
                CheckStatus::Failed
            },
            exit_code: Some(if passed { 0 } else { 1 }),
            error: None,
            stdout: String::new(),
            stderr: if passed {
                String::new()
            } else {
                "assertion failed".to_string()
            },
        }]))
    }
}

/// Config with a test command, so the verify stage consults its verifier.
pub fn scripted_config() -> RunConfig {
    let mut config = RunConfig::default();
    config.validation.test = Some("scripted".to_string());
    config
}

/// Built-in registry with the act and verify stages replaced by scripted
/// collaborators.
pub fn scripted_registry(
    config: &RunConfig,
    agent: ScriptedAgent,
    verifier: ScriptedVerifier,
) -> StageRegistry {
    let mut registry = builtin_registry(config).expect("builtin registry");
    registry.register(config.pipeline.act_stage.clone(), AgentStage::new(agent));
    registry.register(config.pipeline.verify_stage.clone(), VerifyStage::new(verifier));
    registry
}
