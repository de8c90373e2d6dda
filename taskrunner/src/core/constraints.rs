//! Labeled sections inside item bodies and constraint documents.
//!
//! Headers are matched by bilingual keywords. The same classification drives
//! dependency extraction (catalog) and the constraint appendix handed to the
//! acting agent.

use std::sync::LazyLock;

use regex::Regex;

static LIST_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*·•]\s*|\d+[.)]\s*)(.+)$").expect("list entry pattern")
});

static BARE_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s]+[：:]$").expect("bare label pattern"));

static MODULE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:：]\s*(.+)$").expect("module line pattern"));

/// Kind of labeled section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    HardConstraints,
    SoftConstraints,
    Dependencies,
    Risks,
    Acceptance,
    Tests,
}

/// Classify a lowercased line by its keywords. Order matters: a line naming
/// both a constraint kind and a dependency is a constraint header.
pub fn classify_section(lower: &str) -> Option<SectionKind> {
    const TABLE: &[(SectionKind, &[&str])] = &[
        (SectionKind::HardConstraints, &["硬约束", "hard constraint"]),
        (SectionKind::SoftConstraints, &["软约束", "soft constraint"]),
        (SectionKind::Dependencies, &["依赖", "前置", "depend", "prereq"]),
        (SectionKind::Risks, &["风险", "注意", "risk"]),
        (SectionKind::Acceptance, &["验收", "acceptance"]),
        (SectionKind::Tests, &["测试", "test"]),
    ];
    TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(kind, _)| *kind)
}

/// True if a trimmed line is shaped like a section header: a markdown
/// heading, a bold label, or a single token ending with a colon.
pub fn looks_like_header(trimmed: &str) -> bool {
    trimmed.starts_with('#') || trimmed.starts_with("**") || BARE_LABEL_RE.is_match(trimmed)
}

/// Content of a list entry (`- x`, `* x`, `1. x`, `2) x`), if the line is one.
pub fn list_entry(trimmed: &str) -> Option<&str> {
    let caps = LIST_ENTRY_RE.captures(trimmed)?;
    let entry = caps.get(1)?.as_str().trim();
    if entry.is_empty() || entry.chars().all(|c| matches!(c, ':' | '-' | '*')) {
        return None;
    }
    Some(entry)
}

/// Constraint lists gathered from one or more documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    pub hard: Vec<String>,
    pub soft: Vec<String>,
    pub dependencies: Vec<String>,
    pub risks: Vec<String>,
}

impl ConstraintSet {
    /// Parse list entries under hard/soft/dependency/risk headers.
    pub fn parse(content: &str) -> Self {
        let mut set = Self::default();
        let mut section: Option<SectionKind> = None;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry = list_entry(trimmed);
            if (looks_like_header(trimmed) || entry.is_none())
                && let Some(kind) = classify_section(&trimmed.to_lowercase())
            {
                section = Some(kind);
                continue;
            }
            let (Some(kind), Some(entry)) = (section, entry) else {
                continue;
            };
            let target = match kind {
                SectionKind::HardConstraints => &mut set.hard,
                SectionKind::SoftConstraints => &mut set.soft,
                SectionKind::Dependencies => &mut set.dependencies,
                SectionKind::Risks => &mut set.risks,
                SectionKind::Acceptance | SectionKind::Tests => continue,
            };
            target.push(entry.to_string());
        }
        set
    }

    /// Append `other` after `self` (project -> module -> item).
    pub fn merge(mut self, other: ConstraintSet) -> Self {
        self.hard.extend(other.hard);
        self.soft.extend(other.soft);
        self.dependencies.extend(other.dependencies);
        self.risks.extend(other.risks);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hard.is_empty() && self.soft.is_empty() && self.risks.is_empty()
    }

    /// Render the appendix appended to the agent prompt.
    pub fn render_appendix(&self) -> String {
        let mut buf = String::from(
            "## System constraints\n\
             - Code location follows the project architecture, not the coverage of the verification commands\n\
             - If the verification commands do not cover the target directory, update the verification config too\n",
        );
        if !self.hard.is_empty() {
            buf.push_str("\n## Hard constraints (must hold)\n");
            for (i, c) in self.hard.iter().enumerate() {
                buf.push_str(&format!("{}. {c}\n", i + 1));
            }
        }
        if !self.soft.is_empty() {
            buf.push_str("\n## Soft constraints (should hold)\n");
            for (i, c) in self.soft.iter().enumerate() {
                buf.push_str(&format!("{}. {c}\n", i + 1));
            }
        }
        if !self.risks.is_empty() {
            buf.push_str("\n## Risks\n");
            for c in &self.risks {
                buf.push_str(&format!("- {c}\n"));
            }
        }
        buf
    }
}

/// Module name from a `module: <name>` (or `关联模块：<name>`) line.
pub fn module_name(body: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let lower = line.to_lowercase();
        if !(lower.contains("module:") || lower.contains("关联模块") || lower.contains("关联:")) {
            return None;
        }
        let caps = MODULE_LINE_RE.captures(line)?;
        let name = caps[1].replace('*', "");
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}
