//! Run configuration stored under `.taskrunner/config.toml`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ids::{DEFAULT_GROUP_PREFIX, IdScheme};

/// Configuration problems detected at load time, before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{phase} stage '{name}' has no registered handler")]
    UnknownStage { phase: String, name: String },
    #[error("stage '{stage}' maps to unknown target '{target}'")]
    UnknownTarget { stage: String, target: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Built-in handler a stage name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTarget {
    Init,
    LoadTasks,
    SelectNext,
    LoadConstraints,
    Codex,
    Claude,
    Validate,
    Git,
    MarkDone,
    Report,
    /// Arbitrary shell command run in the project root.
    Shell(String),
}

impl StageTarget {
    pub fn parse(stage: &str, target: &str) -> Result<Self, ConfigError> {
        let parsed = match target.trim() {
            "init" => Self::Init,
            "load-tasks" => Self::LoadTasks,
            "select-next" => Self::SelectNext,
            "load-constraints" => Self::LoadConstraints,
            "codex" => Self::Codex,
            "claude" => Self::Claude,
            "validate" => Self::Validate,
            "git" => Self::Git,
            "mark-done" => Self::MarkDone,
            "report" => Self::Report,
            other => match other.strip_prefix("shell:").map(str::trim) {
                Some(command) if !command.is_empty() => Self::Shell(command.to_string()),
                _ => {
                    return Err(ConfigError::UnknownTarget {
                        stage: stage.to_string(),
                        target: target.to_string(),
                    });
                }
            },
        };
        Ok(parsed)
    }
}

impl fmt::Display for StageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::LoadTasks => f.write_str("load-tasks"),
            Self::SelectNext => f.write_str("select-next"),
            Self::LoadConstraints => f.write_str("load-constraints"),
            Self::Codex => f.write_str("codex"),
            Self::Claude => f.write_str("claude"),
            Self::Validate => f.write_str("validate"),
            Self::Git => f.write_str("git"),
            Self::MarkDone => f.write_str("mark-done"),
            Self::Report => f.write_str("report"),
            Self::Shell(command) => write!(f, "shell:{command}"),
        }
    }
}

/// Run configuration (TOML).
///
/// Edited by humans. Missing fields take defaults; `[stages]` entries are
/// merged over the built-in stage map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on Iterate passes per run.
    pub max_iterations: u32,
    /// Halt the run when an item exhausts its repair attempts.
    pub stop_on_failure: bool,
    pub pipeline: PipelineConfig,
    /// Stage name -> target overrides.
    pub stages: BTreeMap<String, String>,
    pub repair: RepairConfig,
    pub validation: ValidationConfig,
    pub agent: AgentConfig,
    pub git: GitConfig,
    pub catalog: CatalogConfig,
    pub paths: PathsConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            stop_on_failure: true,
            pipeline: PipelineConfig::default(),
            stages: BTreeMap::new(),
            repair: RepairConfig::default(),
            validation: ValidationConfig::default(),
            agent: AgentConfig::default(),
            git: GitConfig::default(),
            catalog: CatalogConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub setup: Vec<String>,
    pub iterate: Vec<String>,
    pub teardown: Vec<String>,
    /// Stage that picks the current item.
    pub select_stage: String,
    /// Stage the repair loop re-runs to fix a failed item.
    pub act_stage: String,
    /// Stage whose verdict gates completion.
    pub verify_stage: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
        Self {
            setup: names(&["init", "load_tasks"]),
            iterate: names(&[
                "read_next",
                "load_constraints",
                "execute",
                "validate",
                "git",
                "mark_done",
            ]),
            teardown: names(&["report"]),
            select_stage: "read_next".to_string(),
            act_stage: "execute".to_string(),
            verify_stage: "validate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    pub enabled: bool,
    /// Ceiling on act invocations per item, initial act included.
    pub max_attempts: u32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    pub test: Option<String>,
    pub lint: Option<String>,
    /// Checks that must pass; others are informational.
    pub required: Vec<String>,
    pub timeout_secs: u64,
    /// Bytes of stdout/stderr kept per check for feedback.
    pub output_limit_bytes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            test: None,
            lint: None,
            required: vec!["test".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Extra arguments appended to the agent command line.
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommitStyle {
    #[default]
    Simple,
    Conventional,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub auto_commit: bool,
    pub auto_push: bool,
    pub commit_style: CommitStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CatalogConfig {
    pub group_prefix: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
        }
    }
}

/// Project-relative file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub tasks: PathBuf,
    pub progress: PathBuf,
    pub summary: PathBuf,
    pub logs: PathBuf,
    pub project_constraints: PathBuf,
    pub module_constraints: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tasks: PathBuf::from("tasks.md"),
            progress: PathBuf::from(".taskrunner/progress.md"),
            summary: PathBuf::from(".taskrunner/last_run.json"),
            logs: PathBuf::from(".taskrunner/logs"),
            project_constraints: PathBuf::from(".taskrunner/project-constraints.md"),
            module_constraints: None,
        }
    }
}

/// Built-in stage name -> target map that `[stages]` entries override.
pub fn default_stage_map() -> BTreeMap<String, String> {
    [
        ("init", "init"),
        ("load_tasks", "load-tasks"),
        ("read_next", "select-next"),
        ("load_constraints", "load-constraints"),
        ("execute", "codex"),
        ("codex", "codex"),
        ("claude", "claude"),
        ("validate", "validate"),
        ("git", "git"),
        ("mark_done", "mark-done"),
        ("report", "report"),
    ]
    .into_iter()
    .map(|(name, target)| (name.to_string(), target.to_string()))
    .collect()
}

impl RunConfig {
    /// Resolve every stage name to its target, defaults first.
    pub fn stage_targets(&self) -> Result<BTreeMap<String, StageTarget>, ConfigError> {
        let mut merged = default_stage_map();
        merged.extend(self.stages.clone());
        merged
            .into_iter()
            .map(|(name, target)| {
                let parsed = StageTarget::parse(&name, &target)?;
                Ok((name, parsed))
            })
            .collect()
    }

    pub fn id_scheme(&self) -> Result<IdScheme, ConfigError> {
        IdScheme::new(&self.catalog.group_prefix)
            .map_err(|err| ConfigError::Invalid(format!("catalog.group_prefix: {err}")))
    }

    /// Resolve a configured path against the project root.
    pub fn resolve(&self, root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.max_iterations == 0 {
            return invalid("max_iterations must be > 0");
        }
        if self.repair.max_attempts == 0 {
            return invalid("repair.max_attempts must be > 0");
        }
        if self.validation.timeout_secs == 0 || self.agent.timeout_secs == 0 {
            return invalid("timeout_secs must be > 0");
        }
        if self.validation.output_limit_bytes == 0 || self.agent.output_limit_bytes == 0 {
            return invalid("output_limit_bytes must be > 0");
        }
        if let Some(unknown) = self
            .validation
            .required
            .iter()
            .find(|check| !matches!(check.as_str(), "test" | "lint"))
        {
            return Err(ConfigError::Invalid(format!(
                "validation.required: unknown check '{unknown}'"
            )));
        }
        self.id_scheme()?;

        let targets = self.stage_targets()?;
        let phases = [
            ("setup", &self.pipeline.setup),
            ("iterate", &self.pipeline.iterate),
            ("teardown", &self.pipeline.teardown),
        ];
        for (phase, names) in phases {
            if let Some(name) = names.iter().find(|name| !targets.contains_key(*name)) {
                return Err(ConfigError::UnknownStage {
                    phase: phase.to_string(),
                    name: name.clone(),
                });
            }
        }
        let roles = [
            ("select", &self.pipeline.select_stage),
            ("act", &self.pipeline.act_stage),
            ("verify", &self.pipeline.verify_stage),
        ];
        for (role, name) in roles {
            if !targets.contains_key(name) {
                return Err(ConfigError::UnknownStage {
                    phase: role.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename over it.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.max_iterations, 100);
        assert!(cfg.stop_on_failure);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = RunConfig::default();
        cfg.validation.test = Some("cargo test".to_string());
        cfg.git.commit_style = CommitStyle::Conventional;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults_and_overrides_stages() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_iterations = 5\n[stages]\nexecute = \"claude\"\nlint_fix = \"shell:cargo fmt\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.repair.max_attempts, 3);
        let targets = cfg.stage_targets().expect("targets");
        assert_eq!(targets["execute"], StageTarget::Claude);
        assert_eq!(targets["lint_fix"], StageTarget::Shell("cargo fmt".to_string()));
        assert_eq!(targets["read_next"], StageTarget::SelectNext);
    }

    #[test]
    fn unknown_stage_name_is_a_load_error() {
        let mut cfg = RunConfig::default();
        cfg.pipeline.iterate.push("deploy".to_string());
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::UnknownStage {
                phase: "iterate".to_string(),
                name: "deploy".to_string()
            })
        );
    }

    #[test]
    fn unknown_target_is_a_load_error() {
        let mut cfg = RunConfig::default();
        cfg.stages.insert("execute".to_string(), "gpt".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnknownTarget { ref target, .. }) if target == "gpt"
        ));
        cfg.stages.insert("execute".to_string(), "shell:  ".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut cfg = RunConfig::default();
        cfg.repair.max_attempts = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = RunConfig::default();
        cfg.validation.required = vec!["fmt".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn target_display_round_trips() {
        for raw in ["init", "select-next", "mark-done", "shell:make ci"] {
            let target = StageTarget::parse("s", raw).expect("parse");
            assert_eq!(target.to_string(), raw);
        }
    }
}
