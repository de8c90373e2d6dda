//! Constraint documents: project-wide file, per-module files, item bodies.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::constraints::{ConstraintSet, module_name};

fn read_constraints(path: &Path) -> Result<Option<ConstraintSet>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    debug!(path = %path.display(), "loaded constraints");
    Ok(Some(ConstraintSet::parse(&content)))
}

/// File names tried for a module, in order.
pub fn module_file_candidates(module: &str) -> Vec<String> {
    let mut names = vec![
        format!("{module}.md"),
        format!("{}.md", module.to_lowercase()),
        format!("{}.md", module.split_whitespace().collect::<Vec<_>>().join("-")),
        format!("{}.md", module.split_whitespace().collect::<Vec<_>>().join("_")),
    ];
    let mut seen = Vec::new();
    names.retain(|name| {
        let fresh = !seen.contains(name);
        seen.push(name.clone());
        fresh
    });
    names
}

/// Merge project, module and item constraints, in that order.
///
/// `module_dir` is searched only when the item body names a module.
pub fn collect_constraints(
    project_file: &Path,
    module_dir: Option<&Path>,
    item_body: &str,
) -> Result<ConstraintSet> {
    let project = read_constraints(project_file)?.unwrap_or_default();

    let mut module = ConstraintSet::default();
    if let (Some(dir), Some(name)) = (module_dir, module_name(item_body)) {
        let found = module_file_candidates(&name)
            .into_iter()
            .map(|file| dir.join(file))
            .find(|path: &PathBuf| path.is_file());
        match found {
            Some(path) => module = read_constraints(&path)?.unwrap_or_default(),
            None => debug!(module = %name, dir = %dir.display(), "no module constraints file"),
        }
    }

    Ok(project.merge(module).merge(ConstraintSet::parse(item_body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_case_and_separators() {
        assert_eq!(
            module_file_candidates("Auth Service"),
            vec!["Auth Service.md", "auth service.md", "Auth-Service.md", "Auth_Service.md"]
        );
        assert_eq!(module_file_candidates("auth"), vec!["auth.md"]);
    }

    #[test]
    fn layers_merge_project_then_module_then_item() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project.md");
        fs::write(&project, "**Hard constraints:**\n- project rule\n").expect("write");
        let modules = temp.path().join("modules");
        fs::create_dir_all(&modules).expect("mkdir");
        fs::write(
            modules.join("auth-service.md"),
            "## Hard constraints\n- module rule\n## Risks\n- token leak\n",
        )
        .expect("write");

        let body = "  module: Auth Service\n  **Hard constraints:**\n  - item rule";
        let set = collect_constraints(&project, Some(&modules), body).expect("collect");
        assert_eq!(set.hard, vec!["project rule", "item rule"]);

        let body = "  module: auth-service\n  **Hard constraints:**\n  - item rule";
        let set = collect_constraints(&project, Some(&modules), body).expect("collect");
        assert_eq!(set.hard, vec!["project rule", "module rule", "item rule"]);
        assert_eq!(set.risks, vec!["token leak"]);
    }

    #[test]
    fn missing_files_are_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let set = collect_constraints(&temp.path().join("none.md"), None, "").expect("collect");
        assert!(set.is_empty());
    }
}
