//! Checklist parsing into work items.
//!
//! Each top-level `- [ ]` / `- [x]` entry starts an item; indented and blank
//! lines that follow become its body. The parser is tolerant of marker and id
//! variants and records warnings instead of failing, except for identity
//! problems that would make scheduling ambiguous.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::constraints::{SectionKind, classify_section, looks_like_header};
use crate::core::ids::{IdScheme, SYNTHETIC_PREFIX, item_group_segment, leading_id};
use crate::core::types::{ItemStatus, WorkItem};

static PENDING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s*\[\s*\]\s*(.+)").expect("pending marker pattern"));

static DONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s*\[[xX✓✔]\]\s*(.+)").expect("done marker pattern"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s").expect("heading pattern"));

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+").expect("bullet pattern"));

/// Fatal identity problems found while loading a checklist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("duplicate item ids: {}", .ids.join(", "))]
    DuplicateIds { ids: Vec<String> },
    #[error("item {id} depends on itself (via {via})")]
    SelfDependency { id: String, via: String },
}

/// Parsed checklist: every identified entry plus the completed-id registry.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Items in document order, both pending and done.
    pub items: Vec<WorkItem>,
    /// Ids marked done, in the document or during this run. Never shrinks.
    pub completed: BTreeSet<String>,
    /// Non-fatal format problems (missing ids, missing indentation).
    pub warnings: Vec<String>,
}

impl Catalog {
    pub fn pending_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_pending()).count()
    }

    pub fn get(&self, id: &str) -> Option<&WorkItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Mark the item at `index` done and grow the completed registry.
    pub fn mark_done(&mut self, index: usize) {
        if let Some(item) = self.items.get_mut(index) {
            item.status = ItemStatus::Done;
            self.completed.insert(item.id.clone());
        }
    }
}

/// Dependencies declared in an item body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredDependencies {
    pub items: Vec<String>,
    pub groups: Vec<String>,
    /// Group-prefixed ids that are not valid group ids; dropped.
    pub ignored: Vec<String>,
}

/// Parse a checklist document.
pub fn parse_catalog(content: &str, scheme: &IdScheme) -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::default();
    let mut occurrences: Vec<String> = Vec::new();
    let mut current: Option<WorkItem> = None;
    let mut synthetic = 0u32;

    for (index, raw) in content.split('\n').enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let line_number = index + 1;

        if let Some(caps) = PENDING_RE.captures(line) {
            catalog.items.extend(current.take());
            let text = caps[1].trim();
            let id = match leading_id(text) {
                Some(id) => id,
                None => {
                    synthetic += 1;
                    let id = format!("{SYNTHETIC_PREFIX}-{synthetic:03}");
                    catalog
                        .warnings
                        .push(format!("line {line_number}: entry has no id, assigned {id}"));
                    id
                }
            };
            occurrences.push(id.clone());
            let mut item = WorkItem::new(id, text, ItemStatus::Pending);
            item.line_index = index;
            current = Some(item);
            continue;
        }

        if let Some(caps) = DONE_RE.captures(line) {
            catalog.items.extend(current.take());
            let text = caps[1].trim();
            match leading_id(text) {
                Some(id) => {
                    occurrences.push(id.clone());
                    catalog.completed.insert(id.clone());
                    let mut item = WorkItem::new(id, text, ItemStatus::Done);
                    item.line_index = index;
                    current = Some(item);
                }
                None => catalog
                    .warnings
                    .push(format!("line {line_number}: done entry has no id, ignored")),
            }
            continue;
        }

        let Some(item) = current.as_mut() else {
            continue;
        };
        let trimmed = line.trim();
        let indented = line.starts_with([' ', '\t']) || trimmed.starts_with("**");
        if trimmed.is_empty() || indented {
            push_body_line(item, line);
        } else if HEADING_RE.is_match(line) {
            catalog.items.extend(current.take());
        } else if BULLET_RE.is_match(trimmed) {
            push_body_line(item, line);
            catalog.warnings.push(format!(
                "line {line_number}: body content may be missing indentation"
            ));
        } else {
            catalog.items.extend(current.take());
        }
    }
    catalog.items.extend(current.take());

    for item in &mut catalog.items {
        let declared = extract_dependencies(&item.body, scheme);
        for id in &declared.ignored {
            catalog.warnings.push(format!(
                "{}: dependency {id} is not a valid group id, ignored",
                item.id
            ));
        }
        item.dependencies = declared.items;
        item.group_dependencies = declared.groups;
    }

    for item in catalog.items.iter().filter(|item| item.is_pending()) {
        if item.dependencies.contains(&item.id) {
            return Err(CatalogError::SelfDependency {
                id: item.id.clone(),
                via: item.id.clone(),
            });
        }
        if let Some(segment) = item_group_segment(&item.id)
            && let Some(group) = item
                .group_dependencies
                .iter()
                .find(|group| scheme.group_segment(group).as_deref() == Some(segment))
        {
            return Err(CatalogError::SelfDependency {
                id: item.id.clone(),
                via: group.clone(),
            });
        }
    }

    let duplicates = duplicate_ids(&occurrences);
    if !duplicates.is_empty() {
        return Err(CatalogError::DuplicateIds { ids: duplicates });
    }

    Ok(catalog)
}

fn push_body_line(item: &mut WorkItem, line: &str) {
    if !item.body.is_empty() {
        item.body.push('\n');
    }
    item.body.push_str(line);
}

/// Ids occurring more than once, in order of first occurrence.
fn duplicate_ids(occurrences: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in occurrences {
        *counts.entry(id.as_str()).or_default() += 1;
    }
    let mut out: Vec<String> = Vec::new();
    for id in occurrences {
        if counts[id.as_str()] > 1 && !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

/// Scan the dependency section of an item body for item and group refs.
///
/// The section opens at a header mentioning dependencies and closes at a
/// header for constraints, risks, acceptance or tests. Ids on the opening
/// header line count.
pub fn extract_dependencies(body: &str, scheme: &IdScheme) -> DeclaredDependencies {
    let mut declared = DeclaredDependencies::default();
    let mut in_section = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        let header = looks_like_header(trimmed);
        let kind = classify_section(&lower);

        if header && (kind == Some(SectionKind::Dependencies) || lower.starts_with("dependencies")) {
            in_section = true;
        } else if !in_section {
            continue;
        } else if header && kind.is_some() {
            in_section = false;
            continue;
        }

        for id in scheme.item_refs(trimmed) {
            if !declared.items.contains(&id) {
                declared.items.push(id);
            }
        }
        for id in scheme.group_refs(trimmed) {
            if !declared.groups.contains(&id) {
                declared.groups.push(id);
            }
        }
        for id in scheme.malformed_group_refs(trimmed) {
            if !declared.ignored.contains(&id) {
                declared.ignored.push(id);
            }
        }
    }
    declared
}
