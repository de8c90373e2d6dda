//! Dependency resolution over the catalog: next-item selection, blocked
//! reporting and cycle detection.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::ids::{IdScheme, item_group_segment};
use crate::core::types::{ItemStatus, WorkItem};

/// Result of asking for the next item to work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Index into the item list of the first eligible pending item.
    Ready(usize),
    /// No pending items remain.
    Exhausted,
    /// Pending items remain but none is eligible.
    Blocked(BlockedReport),
    /// A pending item references ids that exist nowhere.
    MissingReferences(MissingReferences),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingReferences {
    pub item: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedItem {
    pub id: String,
    pub blocked_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedReport {
    pub items: Vec<BlockedItem>,
    /// Advisory: every blocker is a group or another pending item.
    pub likely_cycle: bool,
    /// A concrete cycle among pending items, when one exists.
    pub cycle: Option<Vec<String>>,
}

impl BlockedReport {
    pub fn render(&self) -> String {
        let mut buf = String::new();
        for item in &self.items {
            buf.push_str(&format!(
                "  {} blocked by {}\n",
                item.id,
                item.blocked_by.join(", ")
            ));
        }
        if let Some(cycle) = &self.cycle {
            buf.push_str(&format!("  cycle: {}\n", cycle.join(" -> ")));
        } else if self.likely_cycle {
            buf.push_str("  hint: dependencies may form a cycle\n");
        }
        buf
    }
}

/// Split an item's declared refs into item refs and group refs.
/// Item refs shaped like group ids are reclassified.
fn effective_refs(item: &WorkItem, scheme: &IdScheme) -> (Vec<String>, Vec<String>) {
    let mut items = Vec::new();
    let mut groups = item.group_dependencies.clone();
    for dep in &item.dependencies {
        match scheme.normalize_group(dep) {
            Some(group) => {
                if !groups.contains(&group) {
                    groups.push(group);
                }
            }
            None => items.push(dep.clone()),
        }
    }
    (items, groups)
}

/// Pick the first pending item, in document order, whose item dependencies
/// are all completed and whose groups have every member completed.
///
/// `completed` is unioned with items already marked done. References to ids
/// or groups that exist nowhere are reported before readiness is considered.
pub fn select_next(items: &[WorkItem], completed: &BTreeSet<String>, scheme: &IdScheme) -> Selection {
    let mut done: HashSet<&str> = completed.iter().map(String::as_str).collect();
    for item in items.iter().filter(|i| i.status == ItemStatus::Done) {
        done.insert(item.id.as_str());
    }

    let mut known: HashSet<&str> = done.clone();
    let mut known_segments: HashSet<&str> = HashSet::new();
    let mut open_members: HashMap<&str, Vec<&WorkItem>> = HashMap::new();
    for item in items {
        known.insert(item.id.as_str());
        let Some(segment) = item_group_segment(&item.id) else {
            continue;
        };
        known_segments.insert(segment);
        if !done.contains(item.id.as_str()) {
            open_members.entry(segment).or_default().push(item);
        }
    }
    for id in done.iter().copied() {
        if let Some(segment) = item_group_segment(id) {
            known_segments.insert(segment);
        }
    }

    let pending: Vec<(usize, &WorkItem)> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_pending() && !done.contains(item.id.as_str()))
        .collect();
    if pending.is_empty() {
        return Selection::Exhausted;
    }

    for (_, item) in &pending {
        let (deps, groups) = effective_refs(item, scheme);
        let mut missing: Vec<String> = deps
            .into_iter()
            .filter(|dep| !known.contains(dep.as_str()))
            .collect();
        missing.extend(groups.into_iter().filter(|group| {
            scheme
                .group_segment(group)
                .is_none_or(|segment| !known_segments.contains(segment.as_str()))
        }));
        if !missing.is_empty() {
            return Selection::MissingReferences(MissingReferences {
                item: item.id.clone(),
                missing,
            });
        }
    }

    let mut blocked = Vec::new();
    for (index, item) in &pending {
        let (deps, groups) = effective_refs(item, scheme);
        let mut blocked_by: Vec<String> = deps
            .into_iter()
            .filter(|dep| !done.contains(dep.as_str()))
            .collect();
        for group in groups {
            let Some(open) = scheme
                .group_segment(&group)
                .and_then(|segment| open_members.get(segment.as_str()))
            else {
                continue;
            };
            if open.iter().any(|member| member.is_pending()) {
                blocked_by.push(group);
                continue;
            }
            // Only failed members remain: name them.
            for member in open {
                if !blocked_by.contains(&member.id) {
                    blocked_by.push(member.id.clone());
                }
            }
        }
        if blocked_by.is_empty() {
            return Selection::Ready(*index);
        }
        blocked.push(BlockedItem {
            id: item.id.clone(),
            blocked_by,
        });
    }

    let pending_ids: HashSet<&str> = pending.iter().map(|(_, item)| item.id.as_str()).collect();
    let likely_cycle = blocked.iter().all(|entry| {
        entry
            .blocked_by
            .iter()
            .all(|b| scheme.is_group_id(b) || pending_ids.contains(b.as_str()))
    });
    let cycle = DependencyGraph::build(items, scheme).find_cycle();
    Selection::Blocked(BlockedReport {
        items: blocked,
        likely_cycle,
        cycle,
    })
}

/// Directed graph over pending items. Group refs expand to the group's
/// pending members. Edges point from an item to what it depends on.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn build(items: &[WorkItem], scheme: &IdScheme) -> Self {
        let pending: Vec<&WorkItem> = items.iter().filter(|i| i.is_pending()).collect();
        let ids: Vec<String> = pending.iter().map(|i| i.id.clone()).collect();
        let index_of: HashMap<&str, usize> =
            ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        let mut members: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, id) in ids.iter().enumerate() {
            if let Some(segment) = item_group_segment(id) {
                members.entry(segment).or_default().push(i);
            }
        }

        let edges = pending
            .iter()
            .map(|item| {
                let (deps, groups) = effective_refs(item, scheme);
                let mut out: Vec<usize> = deps
                    .iter()
                    .filter_map(|dep| index_of.get(dep.as_str()).copied())
                    .collect();
                for group in &groups {
                    if let Some(segment) = scheme.group_segment(group)
                        && let Some(targets) = members.get(segment.as_str())
                    {
                        out.extend(targets.iter().copied());
                    }
                }
                out.sort_unstable();
                out.dedup();
                out
            })
            .collect();
        Self { ids, edges }
    }

    /// First cycle found, as ids with the start repeated at the end.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }
        let mut marks = vec![Mark::White; self.ids.len()];
        for start in 0..self.ids.len() {
            if marks[start] != Mark::White {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Gray;
            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if let Some(&target) = self.edges[node].get(frame.1) {
                    frame.1 += 1;
                    match marks[target] {
                        Mark::White => {
                            marks[target] = Mark::Gray;
                            stack.push((target, 0));
                        }
                        Mark::Gray => {
                            let from = stack
                                .iter()
                                .position(|(n, _)| *n == target)
                                .unwrap_or(0);
                            let mut cycle: Vec<String> = stack[from..]
                                .iter()
                                .map(|(n, _)| self.ids[*n].clone())
                                .collect();
                            cycle.push(self.ids[target].clone());
                            return Some(cycle);
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        None
    }

    /// Pending ids with dependencies before dependents, or the cycle that
    /// prevents such an order.
    pub fn topological_order(&self) -> Result<Vec<String>, Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(cycle);
        }
        let mut visited = vec![false; self.ids.len()];
        let mut order = Vec::with_capacity(self.ids.len());
        for start in 0..self.ids.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if let Some(&target) = self.edges[node].get(frame.1) {
                    frame.1 += 1;
                    if !visited[target] {
                        visited[target] = true;
                        stack.push((target, 0));
                    }
                } else {
                    order.push(self.ids[node].clone());
                    stack.pop();
                }
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::parse_catalog;

    fn select(doc: &str) -> Selection {
        let scheme = IdScheme::default();
        let catalog = parse_catalog(doc, &scheme).expect("parse");
        select_next(&catalog.items, &catalog.completed, &scheme)
    }

    fn ready_id(doc: &str) -> String {
        let scheme = IdScheme::default();
        let catalog = parse_catalog(doc, &scheme).expect("parse");
        match select_next(&catalog.items, &catalog.completed, &scheme) {
            Selection::Ready(i) => catalog.items[i].id.clone(),
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn group_dependency_waits_for_every_member() {
        let doc = "\
- [ ] IMPL-0001-0001 A
- [ ] IMPL-0001-0002 B
  **Depends:** IMPL-0001-0001
- [ ] IMPL-0002-0001 C
  **Depends:** MOD-0001
";
        assert_eq!(ready_id(doc), "IMPL-0001-0001");

        let doc = doc.replacen("- [ ] IMPL-0001-0001", "- [x] IMPL-0001-0001", 1);
        assert_eq!(ready_id(&doc), "IMPL-0001-0002");

        let doc = doc.replacen("- [ ] IMPL-0001-0002", "- [x] IMPL-0001-0002", 1);
        assert_eq!(ready_id(&doc), "IMPL-0002-0001");
    }

    #[test]
    fn group_of_three_becomes_eligible_only_after_last() {
        let mut doc = "\
- [ ] IMPL-0004-0001 one
- [ ] IMPL-0004-0002 two
- [ ] IMPL-0004-0003 three
- [ ] IMPL-0005-0001 dependent
  **Depends:** MOD-004
"
        .to_string();
        let scheme = IdScheme::default();
        for member in ["IMPL-0004-0001", "IMPL-0004-0002", "IMPL-0004-0003"] {
            let catalog = parse_catalog(&doc, &scheme).expect("parse");
            let dependent = catalog.get("IMPL-0005-0001").expect("dependent");
            assert!(dependent.is_pending());
            assert_eq!(ready_id(&doc), member);
            doc = doc.replacen(&format!("- [ ] {member}"), &format!("- [x] {member}"), 1);
        }
        assert_eq!(ready_id(&doc), "IMPL-0005-0001");
    }

    #[test]
    fn mutual_dependency_is_blocked_with_cycle() {
        let doc = "\
- [ ] IMPL-1 X
  **Depends:** IMPL-2
- [ ] IMPL-2 Y
  **Depends:** IMPL-1
";
        let Selection::Blocked(report) = select(doc) else {
            panic!("expected blocked");
        };
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[0].blocked_by, vec!["IMPL-2"]);
        assert!(report.likely_cycle);
        assert_eq!(
            report.cycle,
            Some(vec!["IMPL-1".to_string(), "IMPL-2".to_string(), "IMPL-1".to_string()])
        );
        assert!(report.render().contains("IMPL-1 -> IMPL-2 -> IMPL-1"));
    }

    #[test]
    fn missing_reference_is_reported_not_blocked() {
        let doc = "\
- [ ] IMPL-1 X
  **Depends:** IMPL-99, MOD-0042
";
        assert_eq!(
            select(doc),
            Selection::MissingReferences(MissingReferences {
                item: "IMPL-1".to_string(),
                missing: vec!["IMPL-99".to_string(), "MOD-0042".to_string()],
            })
        );
    }

    #[test]
    fn completed_registry_satisfies_refs_without_items() {
        let scheme = IdScheme::default();
        let catalog = parse_catalog("- [ ] IMPL-2 b\n  **Depends:** IMPL-1\n", &scheme).expect("parse");
        let completed = BTreeSet::from(["IMPL-1".to_string()]);
        assert_eq!(
            select_next(&catalog.items, &completed, &scheme),
            Selection::Ready(0)
        );
    }

    #[test]
    fn no_pending_items_is_exhausted() {
        assert_eq!(select("- [x] IMPL-1 done\n"), Selection::Exhausted);
        assert_eq!(select("# nothing\n"), Selection::Exhausted);
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let scheme = IdScheme::default();
        let doc = "\
- [ ] IMPL-0002-0001 late
  **Depends:** MOD-0001
- [ ] IMPL-0001-0002 mid
  **Depends:** IMPL-0001-0001
- [ ] IMPL-0001-0001 early
";
        let catalog = parse_catalog(doc, &scheme).expect("parse");
        let order = DependencyGraph::build(&catalog.items, &scheme)
            .topological_order()
            .expect("acyclic");
        let pos = |id: &str| order.iter().position(|o| o == id).expect("present");
        assert!(pos("IMPL-0001-0001") < pos("IMPL-0001-0002"));
        assert!(pos("IMPL-0001-0002") < pos("IMPL-0002-0001"));
    }

    #[test]
    fn failed_group_member_keeps_group_dependency_unmet() {
        use crate::test_support::item;
        let scheme = IdScheme::default();
        let mut failed = item("IMPL-0001-0001", &[]);
        failed.status = ItemStatus::Failed;
        let mut dependent = item("IMPL-0002-0001", &[]);
        dependent.group_dependencies = vec!["MOD-0001".to_string()];

        let Selection::Blocked(report) =
            select_next(&[failed, dependent], &BTreeSet::new(), &scheme)
        else {
            panic!("expected blocked");
        };
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].id, "IMPL-0002-0001");
        assert_eq!(report.items[0].blocked_by, vec!["IMPL-0001-0001"]);
        assert!(!report.likely_cycle);
    }

    #[test]
    fn done_items_satisfy_dependencies_without_registry() {
        use crate::test_support::{done_item, item};
        let scheme = IdScheme::default();
        let items = vec![item("IMPL-2", &["IMPL-1"]), done_item("IMPL-1")];
        assert_eq!(
            select_next(&items, &BTreeSet::new(), &scheme),
            Selection::Ready(0)
        );
    }
}
