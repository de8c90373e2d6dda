//! Checklist diagnostics for `taskrunner check`.

use std::path::Path;

use anyhow::Result;

use crate::core::catalog::Catalog;
use crate::core::graph::{DependencyGraph, MissingReferences, Selection, select_next};
use crate::core::ids::IdScheme;
use crate::select::load_catalog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckVerdict {
    /// Pending items in an order that respects every dependency.
    Ordered(Vec<String>),
    Cycle(Vec<String>),
    MissingReferences(MissingReferences),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub items: usize,
    pub pending: usize,
    pub warnings: Vec<String>,
    pub verdict: CheckVerdict,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        matches!(self.verdict, CheckVerdict::Ordered(_))
    }

    pub fn render(&self) -> String {
        let mut buf = format!("{} items, {} pending\n", self.items, self.pending);
        for warning in &self.warnings {
            buf.push_str(&format!("warning: {warning}\n"));
        }
        match &self.verdict {
            CheckVerdict::Ordered(order) => {
                for (i, id) in order.iter().enumerate() {
                    buf.push_str(&format!("{:>3}. {id}\n", i + 1));
                }
            }
            CheckVerdict::Cycle(cycle) => {
                buf.push_str(&format!("dependency cycle: {}\n", cycle.join(" -> ")));
            }
            CheckVerdict::MissingReferences(missing) => {
                buf.push_str(&format!(
                    "{} references unknown ids: {}\n",
                    missing.item,
                    missing.missing.join(", ")
                ));
            }
        }
        buf
    }
}

/// Reference and cycle check over an in-memory catalog.
pub fn check_catalog(catalog: &Catalog, scheme: &IdScheme) -> CheckReport {
    let verdict = match select_next(&catalog.items, &catalog.completed, scheme) {
        Selection::MissingReferences(missing) => CheckVerdict::MissingReferences(missing),
        _ => match DependencyGraph::build(&catalog.items, scheme).topological_order() {
            Ok(order) => CheckVerdict::Ordered(order),
            Err(cycle) => CheckVerdict::Cycle(cycle),
        },
    };
    CheckReport {
        items: catalog.items.len(),
        pending: catalog.pending_count(),
        warnings: catalog.warnings.clone(),
        verdict,
    }
}

/// Load config and checklist under `root` and check them.
///
/// Integrity errors (duplicate ids, self-dependency) and config errors are
/// returned as `Err`.
pub fn check_root(root: &Path) -> Result<CheckReport> {
    let (_, scheme, catalog) = load_catalog(root)?;
    Ok(check_catalog(&catalog, &scheme))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{CatalogError, parse_catalog};
    use crate::test_support::write_tasks;

    fn check(doc: &str) -> CheckReport {
        let scheme = IdScheme::default();
        check_catalog(&parse_catalog(doc, &scheme).expect("parse"), &scheme)
    }

    #[test]
    fn order_lists_dependencies_first() {
        let report = check("- [ ] IMPL-2 b\n  **Depends:** IMPL-1\n- [ ] IMPL-1 a\n");
        assert!(report.is_ok());
        assert_eq!(
            report.verdict,
            CheckVerdict::Ordered(vec!["IMPL-1".to_string(), "IMPL-2".to_string()])
        );
        assert!(report.render().contains("  1. IMPL-1\n  2. IMPL-2\n"));
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let report = check("- [ ] X-1 x\n  **Depends:** Y-1\n- [ ] Y-1 y\n  **Depends:** X-1\n");
        assert!(!report.is_ok());
        let CheckVerdict::Cycle(cycle) = &report.verdict else {
            panic!("expected cycle, got {:?}", report.verdict);
        };
        assert_eq!(cycle.first(), cycle.last());
        assert!(report.render().contains("dependency cycle: "));
    }

    #[test]
    fn missing_reference_fails_check() {
        let report = check("- [ ] IMPL-1 a\n  **Depends:** IMPL-7\n");
        assert!(matches!(
            report.verdict,
            CheckVerdict::MissingReferences(ref m) if m.missing == vec!["IMPL-7".to_string()]
        ));
    }

    #[test]
    fn duplicate_ids_surface_as_typed_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_tasks(temp.path(), "- [ ] IMPL-1 a\n- [x] IMPL-1 b\n");
        let err = check_root(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::DuplicateIds { .. })
        ));
    }
}
