//! Scaffolding for `.taskrunner/` in a project root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{RunConfig, write_config};

/// Canonical locations under a project root. Configurable artifact paths
/// live in [`RunConfig::paths`]; these are the fixed ones.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".taskrunner");
        Self {
            config_path: state_dir.join("config.toml"),
            gitignore_path: state_dir.join(".gitignore"),
            state_dir,
            root,
        }
    }
}

/// Create `.taskrunner/` with a default config, plus a starter checklist and
/// project constraints file when those are missing.
///
/// Refuses to replace an existing config unless `force` is set. The
/// checklist is never overwritten.
pub fn init_workspace(root: &Path, force: bool) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!("init: .taskrunner exists but is not a directory"));
    }
    if paths.config_path.exists() && !force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    let config = RunConfig::default();
    write_config(&paths.config_path, &config)?;
    write_file(&paths.gitignore_path, STATE_GITIGNORE)?;

    let constraints = config.resolve(root, &config.paths.project_constraints);
    if force || !constraints.exists() {
        write_file(&constraints, CONSTRAINTS_PLACEHOLDER)?;
    }
    let tasks = config.resolve(root, &config.paths.tasks);
    if !tasks.exists() {
        write_file(&tasks, TASKS_PLACEHOLDER)?;
    }

    info!(root = %root.display(), "workspace initialized");
    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const STATE_GITIGNORE: &str = "logs/\nlast_run.json\n";
const TASKS_PLACEHOLDER: &str = "# Tasks\n\n\
<!-- One entry per line: - [ ] ID description. Indented lines below an entry form its body. -->\n";
const CONSTRAINTS_PLACEHOLDER: &str = "# Project constraints\n\n\
**Hard constraints:**\n\n\
**Soft constraints:**\n\n\
**Risks:**\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_config_and_starter_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), false).expect("init");

        assert!(paths.state_dir.is_dir());
        assert_eq!(load_config(&paths.config_path).expect("load"), RunConfig::default());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            STATE_GITIGNORE
        );
        assert!(temp.path().join("tasks.md").is_file());
        assert!(temp.path().join(".taskrunner/project-constraints.md").is_file());
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), false).expect("init");
        let err = init_workspace(temp.path(), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn force_rewrites_config_but_keeps_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), false).expect("init");
        fs::write(&paths.config_path, "max_iterations = 7\n").expect("custom config");
        fs::write(temp.path().join("tasks.md"), "- [ ] IMPL-1 mine\n").expect("custom tasks");

        init_workspace(temp.path(), true).expect("re-init");

        assert_eq!(load_config(&paths.config_path).expect("load").max_iterations, 100);
        assert_eq!(
            fs::read_to_string(temp.path().join("tasks.md")).expect("read"),
            "- [ ] IMPL-1 mine\n"
        );
    }
}
