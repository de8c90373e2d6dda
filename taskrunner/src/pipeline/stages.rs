//! Built-in stage handlers and the registry assembled from config.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, info, instrument, warn};

use crate::core::catalog::CatalogError;
use crate::core::graph::{Selection, select_next};
use crate::core::signal::StageSignal;
use crate::core::types::Outcome;
use crate::io::agent::{Agent, AgentRequest, ClaudeAgent, CodexAgent, agent_log_path};
use crate::io::checklist::{load_checklist, mark_item_done};
use crate::io::config::{ConfigError, RunConfig, StageTarget};
use crate::io::constraints::collect_constraints;
use crate::io::git::{Git, commit_message};
use crate::io::process::{run_command_with_timeout, shell_command};
use crate::io::progress::{RunSummary, append_progress, write_summary};
use crate::io::prompt::{PromptInputs, render_agent_prompt};
use crate::io::verify::{CheckSpec, ShellVerifier, VerifyRequest, Verifier};
use crate::pipeline::context::{HaltReason, RunContext, StopReason, clock_datetime};
use crate::pipeline::registry::{StageHandler, StageRegistry};

/// Starts the run clock and clears counters.
pub struct InitStage;

impl StageHandler for InitStage {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        ctx.stats = Default::default();
        ctx.stats.started_at = Some(clock_datetime());
        ctx.stats.started = Some(Instant::now());
        ctx.records.clear();
        ctx.errors.clear();
        ctx.failures.clear();
        info!(root = %ctx.root.display(), "run started");
        Ok(StageSignal::proceed())
    }
}

/// Parses the checklist into the catalog.
pub struct LoadTasksStage;

impl StageHandler for LoadTasksStage {
    #[instrument(skip_all)]
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        let path = ctx.path(&ctx.config.paths.tasks);
        let catalog = match load_checklist(&path, &ctx.scheme) {
            Ok(Some(catalog)) => catalog,
            Ok(None) => {
                warn!(path = %path.display(), "checklist not found; nothing to do");
                ctx.more_work = false;
                return Ok(StageSignal::proceed());
            }
            Err(err) => match err.downcast_ref::<CatalogError>() {
                Some(integrity) => {
                    let message = integrity.to_string();
                    error!(path = %path.display(), "{message}");
                    ctx.record_error(&ctx.stage.clone(), message.clone());
                    ctx.halt_with(HaltReason::Integrity(message));
                    return Ok(StageSignal::halt());
                }
                None => return Err(err),
            },
        };

        let pending = catalog.pending_count();
        info!(
            items = catalog.items.len(),
            pending,
            completed = catalog.completed.len(),
            "checklist loaded"
        );
        ctx.more_work = pending > 0;
        ctx.catalog = catalog;
        Ok(StageSignal::proceed())
    }
}

/// Picks the first eligible pending item.
pub struct SelectNextStage;

impl StageHandler for SelectNextStage {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        match select_next(&ctx.catalog.items, &ctx.catalog.completed, &ctx.scheme) {
            Selection::Ready(index) => {
                ctx.current = Some(index);
                if let Some(item) = ctx.current_item_mut() {
                    item.selected_at = Some(Instant::now());
                    info!(item = %item.id, description = %item.description, "selected");
                }
                Ok(StageSignal::proceed())
            }
            Selection::Exhausted => {
                info!("no pending items remain");
                ctx.current = None;
                ctx.more_work = false;
                Ok(StageSignal::skip_iteration())
            }
            Selection::Blocked(report) => {
                warn!("pending items are blocked:\n{}", report.render());
                ctx.current = None;
                ctx.halt_with(HaltReason::Blocked(report));
                Ok(StageSignal::halt())
            }
            Selection::MissingReferences(missing) => {
                let reason = HaltReason::MissingReferences {
                    item: missing.item,
                    missing: missing.missing,
                };
                error!("{reason}");
                ctx.record_error(&ctx.stage.clone(), reason.to_string());
                ctx.current = None;
                ctx.halt_with(reason);
                Ok(StageSignal::halt())
            }
        }
    }
}

/// Builds the constraint appendix for the current item.
pub struct LoadConstraintsStage;

impl StageHandler for LoadConstraintsStage {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        let Some(item) = ctx.current_item() else {
            return Ok(StageSignal::proceed());
        };
        let unmet: Vec<&str> = item
            .dependencies
            .iter()
            .filter(|dep| !ctx.catalog.completed.contains(*dep))
            .filter(|dep| ctx.scheme.normalize_group(dep).is_none())
            .map(String::as_str)
            .collect();
        if !unmet.is_empty() {
            bail!("{} selected with unmet dependencies: {}", item.id, unmet.join(", "));
        }

        let project = ctx.path(&ctx.config.paths.project_constraints);
        let modules = ctx
            .config
            .paths
            .module_constraints
            .as_ref()
            .map(|dir| ctx.path(dir));
        let set = collect_constraints(&project, modules.as_deref(), &item.body)?;
        ctx.constraint_prompt = set.render_appendix();
        Ok(StageSignal::proceed())
    }
}

/// Hands the current item to an agent backend.
pub struct AgentStage<A> {
    agent: A,
}

impl<A: Agent> AgentStage<A> {
    pub fn new(agent: A) -> Self {
        Self { agent }
    }
}

impl<A: Agent> StageHandler for AgentStage<A> {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        let Some(item) = ctx.current_item() else {
            return Ok(StageSignal::proceed());
        };
        let attempt = item.attempts.max(1);
        let prompt = render_agent_prompt(&PromptInputs {
            item_id: &item.id,
            description: &item.description,
            body: &item.body,
            constraints: &ctx.constraint_prompt,
            feedback: &ctx.verification_feedback,
            attempt,
            max_attempts: ctx.config.repair.max_attempts,
        })?;
        let logs = ctx.path(&ctx.config.paths.logs);
        let request = AgentRequest {
            item_id: item.id.clone(),
            attempt,
            workdir: ctx.root.clone(),
            prompt,
            log_path: agent_log_path(&logs, &item.id, attempt),
            timeout: Duration::from_secs(ctx.config.agent.timeout_secs),
            output_limit_bytes: ctx.config.agent.output_limit_bytes,
            extra_args: ctx.config.agent.extra_args.clone(),
        };
        self.agent
            .invoke(&request)
            .with_context(|| format!("{} on {}", self.agent.name(), request.item_id))?;
        Ok(StageSignal::proceed())
    }
}

/// Runs the configured checks and reports the verdict.
pub struct VerifyStage<V> {
    verifier: V,
}

impl<V: Verifier> VerifyStage<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }
}

/// Checks named in `[validation]`, in `test`, `lint` order.
pub fn configured_checks(config: &RunConfig) -> Vec<CheckSpec> {
    let validation = &config.validation;
    [("test", &validation.test), ("lint", &validation.lint)]
        .into_iter()
        .filter_map(|(name, command)| {
            let command = command.as_deref()?.trim();
            (!command.is_empty()).then(|| CheckSpec {
                name: name.to_string(),
                command: command.to_string(),
                required: validation.required.iter().any(|r| r == name),
            })
        })
        .collect()
}

impl<V: Verifier> StageHandler for VerifyStage<V> {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        if ctx.current.is_none() {
            return Ok(StageSignal::proceed());
        }
        let checks = configured_checks(&ctx.config);
        if checks.is_empty() {
            info!("no verification commands configured; treating as passed");
            ctx.verification_feedback.clear();
            return Ok(StageSignal::verification(true));
        }
        let request = VerifyRequest {
            workdir: ctx.root.clone(),
            checks,
            timeout: Duration::from_secs(ctx.config.validation.timeout_secs),
            output_limit_bytes: ctx.config.validation.output_limit_bytes,
        };
        let report = self.verifier.verify(&request)?;
        let passed = report.passed;
        ctx.verification_feedback = report.feedback();
        ctx.last_verification = Some(report);
        Ok(StageSignal::verification(passed))
    }
}

/// Commits (and optionally pushes) the item's changes. Never halts.
pub struct GitStage;

impl GitStage {
    fn commit(ctx: &RunContext, description: &str) -> Result<Option<String>> {
        let git = Git::new(&ctx.root);
        if !git.has_changes()? {
            return Ok(None);
        }
        git.add_all()?;
        let message = commit_message(ctx.config.git.commit_style, description);
        if !git.commit_staged(&message)? {
            return Ok(None);
        }
        let sha = git.head_short_sha(7)?;
        if ctx.config.git.auto_push {
            git.push()?;
        }
        Ok(Some(sha))
    }
}

impl StageHandler for GitStage {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        if !ctx.config.git.auto_commit {
            return Ok(StageSignal::proceed());
        }
        let Some(description) = ctx.current_item().map(|item| item.description.clone()) else {
            return Ok(StageSignal::proceed());
        };
        match Self::commit(ctx, &description) {
            Ok(Some(sha)) => {
                info!(commit = %sha, "committed");
                ctx.last_commit = Some(sha);
            }
            Ok(None) => info!("nothing to commit"),
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "git stage failed; continuing");
                ctx.record_error(&ctx.stage.clone(), message);
            }
        }
        Ok(StageSignal::proceed())
    }
}

/// Flips the item's checkbox on disk and records completion.
pub struct MarkDoneStage;

impl StageHandler for MarkDoneStage {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        let Some(index) = ctx.current else {
            return Ok(StageSignal::proceed());
        };
        let (id, line_index) = ctx
            .catalog
            .items
            .get(index)
            .map(|item| (item.id.clone(), item.line_index))
            .ok_or_else(|| anyhow!("current item index {index} out of range"))?;

        let path = ctx.path(&ctx.config.paths.tasks);
        mark_item_done(&path, line_index, &id)?;
        ctx.catalog.mark_done(index);
        ctx.stats.completed += 1;

        let note = ctx
            .last_commit
            .take()
            .map(|sha| format!("commit: {sha}"))
            .unwrap_or_default();
        ctx.record_outcome(Outcome::Done, note);
        info!(item = %id, "marked done");
        ctx.current = None;
        Ok(StageSignal::proceed())
    }
}

/// Writes the progress log entry and the last-run summary.
pub struct ReportStage;

impl ReportStage {
    pub fn summary(ctx: &RunContext) -> RunSummary {
        let stop = ctx.stop.as_ref();
        let stopped = matches!(stop, Some(StopReason::Halted { .. }));
        RunSummary {
            started_at: ctx.stats.started_at.clone().unwrap_or_else(clock_datetime),
            finished_at: clock_datetime(),
            duration_ms: ctx.run_elapsed_ms(),
            stopped,
            stop_reason: stop
                .filter(|s| !matches!(s, StopReason::Complete))
                .map(ToString::to_string),
            iterations: ctx.iterations,
            completed: ctx.stats.completed,
            failed: ctx.stats.failed,
            skipped: ctx.stats.skipped,
            records: ctx.records.clone(),
            errors: ctx.errors.clone(),
            failures: ctx.failures.clone(),
        }
    }
}

impl StageHandler for ReportStage {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        let summary = Self::summary(ctx);
        info!(
            iterations = summary.iterations,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "run summary"
        );
        append_progress(&ctx.path(&ctx.config.paths.progress), &summary)?;
        write_summary(&ctx.path(&ctx.config.paths.summary), &summary)?;
        Ok(StageSignal::proceed())
    }
}

/// Runs a shell command in the project root; non-zero exit is an error.
pub struct ShellStage {
    command: String,
}

impl ShellStage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl StageHandler for ShellStage {
    fn run(&self, ctx: &mut RunContext) -> Result<StageSignal> {
        info!(command = %self.command, "running shell stage");
        let timeout = Duration::from_secs(ctx.config.agent.timeout_secs);
        let output = run_command_with_timeout(
            shell_command(&self.command, &ctx.root),
            None,
            timeout,
            ctx.config.validation.output_limit_bytes,
        )
        .with_context(|| format!("run `{}`", self.command))?;
        if output.timed_out {
            bail!("`{}` timed out after {}s", self.command, timeout.as_secs());
        }
        if !output.succeeded() {
            let stderr = output.stderr_text();
            let first = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            bail!(
                "`{}` exited with status {:?}: {first}",
                self.command,
                output.status.code()
            );
        }
        Ok(StageSignal::proceed())
    }
}

/// Registry for every stage name in the config's stage map.
pub fn builtin_registry(config: &RunConfig) -> Result<StageRegistry, ConfigError> {
    let mut registry = StageRegistry::new();
    for (name, target) in config.stage_targets()? {
        match target {
            StageTarget::Init => registry.register(name, InitStage),
            StageTarget::LoadTasks => registry.register(name, LoadTasksStage),
            StageTarget::SelectNext => registry.register(name, SelectNextStage),
            StageTarget::LoadConstraints => registry.register(name, LoadConstraintsStage),
            StageTarget::Codex => registry.register(name, AgentStage::new(CodexAgent)),
            StageTarget::Claude => registry.register(name, AgentStage::new(ClaudeAgent)),
            StageTarget::Validate => registry.register(name, VerifyStage::new(ShellVerifier)),
            StageTarget::Git => registry.register(name, GitStage),
            StageTarget::MarkDone => registry.register(name, MarkDoneStage),
            StageTarget::Report => registry.register(name, ReportStage),
            StageTarget::Shell(command) => registry.register(name, ShellStage::new(command)),
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx_in(root: &std::path::Path, tasks: &str) -> RunContext {
        fs::write(root.join("tasks.md"), tasks).expect("write tasks");
        RunContext::new(root, RunConfig::default()).expect("ctx")
    }

    #[test]
    fn load_tasks_without_pending_work_clears_more_work() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ctx_in(temp.path(), "- [x] IMPL-1 done\n");
        LoadTasksStage.run(&mut ctx).expect("load");
        assert!(!ctx.more_work);
        assert!(ctx.catalog.completed.contains("IMPL-1"));
    }

    #[test]
    fn duplicate_ids_halt_with_integrity_reason() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ctx_in(temp.path(), "- [ ] IMPL-1 a\n- [ ] IMPL-1 b\n");
        let signal = LoadTasksStage.run(&mut ctx).expect("load");
        assert!(signal.is_halt());
        assert!(matches!(ctx.halt, Some(HaltReason::Integrity(ref m)) if m.contains("IMPL-1")));
    }

    #[test]
    fn select_then_mark_done_updates_disk_and_registry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ctx_in(
            temp.path(),
            "- [ ] IMPL-2 second\n  **Depends:** IMPL-1\n- [ ] IMPL-1 first\n",
        );
        LoadTasksStage.run(&mut ctx).expect("load");
        SelectNextStage.run(&mut ctx).expect("select");
        assert_eq!(ctx.current_item().map(|i| i.id.as_str()), Some("IMPL-1"));

        ctx.last_commit = Some("abc1234".to_string());
        MarkDoneStage.run(&mut ctx).expect("mark");
        assert_eq!(ctx.current, None);
        assert!(ctx.catalog.completed.contains("IMPL-1"));
        assert_eq!(ctx.records[0].note, "commit: abc1234");
        let text = fs::read_to_string(temp.path().join("tasks.md")).expect("read");
        assert_eq!(text, "- [ ] IMPL-2 second\n  **Depends:** IMPL-1\n- [x] IMPL-1 first\n");

        SelectNextStage.run(&mut ctx).expect("select");
        assert_eq!(ctx.current_item().map(|i| i.id.as_str()), Some("IMPL-2"));
    }

    #[test]
    fn missing_reference_halts_and_records_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ctx_in(temp.path(), "- [ ] IMPL-1 a\n  **Depends:** IMPL-9\n");
        LoadTasksStage.run(&mut ctx).expect("load");
        let signal = SelectNextStage.run(&mut ctx).expect("select");
        assert!(signal.is_halt());
        assert_eq!(ctx.errors.len(), 1);
        assert!(matches!(ctx.halt, Some(HaltReason::MissingReferences { .. })));
    }

    #[test]
    fn verify_without_checks_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ctx_in(temp.path(), "- [ ] IMPL-1 a\n");
        LoadTasksStage.run(&mut ctx).expect("load");
        SelectNextStage.run(&mut ctx).expect("select");
        let signal = VerifyStage::new(ShellVerifier).run(&mut ctx).expect("verify");
        assert_eq!(signal.verification_passed, Some(true));
    }

    #[test]
    fn failing_check_sets_feedback() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ctx_in(temp.path(), "- [ ] IMPL-1 a\n");
        ctx.config.validation.test = Some("echo nope >&2; exit 3".to_string());
        LoadTasksStage.run(&mut ctx).expect("load");
        SelectNextStage.run(&mut ctx).expect("select");
        let signal = VerifyStage::new(ShellVerifier).run(&mut ctx).expect("verify");
        assert_eq!(signal.verification_passed, Some(false));
        assert!(ctx.verification_feedback.contains("## TEST FAILED"));
        assert!(ctx.verification_feedback.contains("ExitCode: 3"));
    }

    #[test]
    fn lint_is_informational_unless_required() {
        let mut config = RunConfig::default();
        config.validation.test = Some("true".to_string());
        config.validation.lint = Some("  ".to_string());
        let checks = configured_checks(&config);
        assert_eq!(checks.len(), 1);
        config.validation.lint = Some("false".to_string());
        let checks = configured_checks(&config);
        assert!(checks[0].required);
        assert!(!checks[1].required);
    }

    #[test]
    fn shell_stage_failure_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ctx_in(temp.path(), "");
        assert!(ShellStage::new("true").run(&mut ctx).is_ok());
        let err = ShellStage::new("echo bad >&2; exit 2").run(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn builtin_registry_covers_default_pipeline() {
        let config = RunConfig::default();
        let registry = builtin_registry(&config).expect("registry");
        for name in config.pipeline.setup.iter().chain(&config.pipeline.iterate) {
            assert!(registry.contains(name), "{name}");
        }
    }
}
