//! Read-only selection for `taskrunner next`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::catalog::Catalog;
use crate::core::graph::{BlockedReport, MissingReferences, Selection, select_next};
use crate::core::ids::IdScheme;
use crate::io::checklist::load_checklist;
use crate::io::config::{RunConfig, load_config};
use crate::io::init::WorkspacePaths;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// No pending items.
    Complete,
    Ready(SelectedItem),
    Blocked(BlockedReport),
    MissingReferences(MissingReferences),
}

/// Minimal selected item metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedItem {
    pub id: String,
    pub description: String,
    /// 1-based line of the entry in the checklist.
    pub line: usize,
}

/// Select the next item from an in-memory catalog.
pub fn select_item(catalog: &Catalog, scheme: &IdScheme) -> SelectOutcome {
    match select_next(&catalog.items, &catalog.completed, scheme) {
        Selection::Ready(index) => {
            let item = &catalog.items[index];
            SelectOutcome::Ready(SelectedItem {
                id: item.id.clone(),
                description: item.description.clone(),
                line: item.line_index + 1,
            })
        }
        Selection::Exhausted => SelectOutcome::Complete,
        Selection::Blocked(report) => SelectOutcome::Blocked(report),
        Selection::MissingReferences(missing) => SelectOutcome::MissingReferences(missing),
    }
}

/// Load config and checklist under `root`.
pub fn load_catalog(root: &Path) -> Result<(RunConfig, IdScheme, Catalog)> {
    let paths = WorkspacePaths::new(root);
    let config = load_config(&paths.config_path).context("load config")?;
    let scheme = config.id_scheme()?;
    let tasks = config.resolve(root, &config.paths.tasks);
    let catalog = load_checklist(&tasks, &scheme)?
        .ok_or_else(|| anyhow!("checklist not found: {}", tasks.display()))?;
    Ok((config, scheme, catalog))
}

/// Load the checklist from disk and select the next item.
pub fn select_from_root(root: &Path) -> Result<SelectOutcome> {
    let (_, scheme, catalog) = load_catalog(root).context("load checklist for selection")?;
    Ok(select_item(&catalog, &scheme))
}
