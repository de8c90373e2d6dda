//! Identity rules for work items and groups.
//!
//! Item ids look like `IMPL-12` or `IMPL-0003-0007`. The second form carries a
//! four-digit group segment (`0003`) shared by every item of that group. Group
//! ids (`MOD-0003`, or the legacy three-digit `MOD-003`) name the whole set.
//! Everything is case-insensitive and normalized to uppercase.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;

/// Group prefix used when the configuration does not override it.
pub const DEFAULT_GROUP_PREFIX: &str = "MOD";

/// Prefix for ids assigned to entries that carry none.
pub const SYNTHETIC_PREFIX: &str = "AUTO";

static LEADING_ID_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)^\[([A-Z]+-(?:\d{4}-\d{4}|\d+))\]").expect("bracket id pattern"),
        Regex::new(r"(?i)^\(([A-Z]+-(?:\d{4}-\d{4}|\d+))\)").expect("paren id pattern"),
        Regex::new(r"(?i)^([A-Z]+-(?:\d{4}-\d{4}|\d+)):").expect("colon id pattern"),
        Regex::new(r"(?i)^([A-Z]+-(?:\d{4}-\d{4}|\d+))(?:\s|$)").expect("space id pattern"),
    ]
});

static ITEM_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Z]+-\d{4}-\d{4}|[A-Z]+-\d+)\b").expect("item ref pattern")
});

static ITEM_GROUP_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]+-(\d{4})-\d{4}$").expect("group segment pattern"));

/// Extract the id at the start of an entry's text, trying `[ID]`, `(ID)`,
/// `ID:` and `ID ` in that order.
pub fn leading_id(text: &str) -> Option<String> {
    LEADING_ID_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(text))
        .map(|caps| caps[1].to_uppercase())
}

/// Group segment encoded in an item id (`IMPL-0003-0007` -> `0003`).
pub fn item_group_segment(id: &str) -> Option<&str> {
    ITEM_GROUP_SEGMENT_RE
        .captures(id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Prefix-aware id rules. The group prefix is configurable, item rules are not.
#[derive(Debug, Clone)]
pub struct IdScheme {
    group_prefix: String,
    group_ref_re: Regex,
    group_exact_re: Regex,
    group_like_re: Regex,
}

impl IdScheme {
    pub fn new(group_prefix: &str) -> Result<Self> {
        let prefix = group_prefix.trim().to_uppercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(anyhow!(
                "group prefix must be ASCII letters, got '{group_prefix}'"
            ));
        }
        let escaped = regex::escape(&prefix);
        Ok(Self {
            group_ref_re: Regex::new(&format!(r"(?i)\b{escaped}-\d{{3,4}}\b"))
                .context("compile group ref pattern")?,
            group_exact_re: Regex::new(&format!(r"(?i)^{escaped}-(\d{{3,4}})$"))
                .context("compile group id pattern")?,
            group_like_re: Regex::new(&format!(r"(?i)^{escaped}-\d+$"))
                .context("compile group-like pattern")?,
            group_prefix: prefix,
        })
    }

    /// True for well-formed group ids (`MOD-003`, `mod-0003`).
    pub fn is_group_id(&self, id: &str) -> bool {
        self.group_exact_re.is_match(id.trim())
    }

    /// Pad a group id to four digits and uppercase it.
    pub fn normalize_group(&self, id: &str) -> Option<String> {
        self.group_segment(id)
            .map(|segment| format!("{}-{segment}", self.group_prefix))
    }

    /// Four-digit segment named by a group id (`MOD-003` -> `0003`).
    pub fn group_segment(&self, id: &str) -> Option<String> {
        let caps = self.group_exact_re.captures(id.trim())?;
        Some(format!("{:0>4}", &caps[1]))
    }

    /// Item-shaped references in `text`, uppercased, in first-seen order.
    /// Anything carrying the group prefix is left to [`Self::group_refs`].
    pub fn item_refs(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for caps in ITEM_REF_RE.captures_iter(text) {
            let id = caps[1].to_uppercase();
            if self.group_like_re.is_match(&id) || out.contains(&id) {
                continue;
            }
            out.push(id);
        }
        out
    }

    /// Ids carrying the group prefix that are not valid group ids
    /// (`MOD-1`, `MOD-00001`). Neither [`Self::item_refs`] nor
    /// [`Self::group_refs`] picks these up.
    pub fn malformed_group_refs(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for caps in ITEM_REF_RE.captures_iter(text) {
            let id = caps[1].to_uppercase();
            if self.group_like_re.is_match(&id) && !self.is_group_id(&id) && !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// Normalized group references in `text`, in first-seen order.
    pub fn group_refs(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in self.group_ref_re.find_iter(text) {
            if let Some(id) = self.normalize_group(m.as_str())
                && !out.contains(&id)
            {
                out.push(id);
            }
        }
        out
    }
}

impl Default for IdScheme {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_PREFIX).expect("default group prefix is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_id_accepts_all_shapes() {
        assert_eq!(leading_id("[IMPL-001] build"), Some("IMPL-001".to_string()));
        assert_eq!(leading_id("(impl-0001-0002) x"), Some("IMPL-0001-0002".to_string()));
        assert_eq!(leading_id("TEST-7: write"), Some("TEST-7".to_string()));
        assert_eq!(leading_id("TEST-7 write"), Some("TEST-7".to_string()));
        assert_eq!(leading_id("TEST-7"), Some("TEST-7".to_string()));
        assert_eq!(leading_id("write TEST-7"), None);
    }

    #[test]
    fn group_segment_only_for_grouped_ids() {
        assert_eq!(item_group_segment("IMPL-0003-0007"), Some("0003"));
        assert_eq!(item_group_segment("IMPL-3"), None);
    }

    #[test]
    fn group_ids_normalize_to_four_digits() {
        let scheme = IdScheme::default();
        assert!(scheme.is_group_id("mod-003"));
        assert!(!scheme.is_group_id("MOD-0003-0001"));
        assert_eq!(scheme.normalize_group("mod-003"), Some("MOD-0003".to_string()));
        assert_eq!(scheme.group_segment("MOD-0012"), Some("0012".to_string()));
    }

    #[test]
    fn refs_split_items_from_groups() {
        let scheme = IdScheme::default();
        let text = "- IMPL-0001-0002, test-4 and MOD-002\n- IMPL-0001-0002 again";
        assert_eq!(scheme.item_refs(text), vec!["IMPL-0001-0002", "TEST-4"]);
        assert_eq!(scheme.group_refs(text), vec!["MOD-0002"]);
    }

    #[test]
    fn short_group_prefixed_ids_are_flagged_malformed() {
        let scheme = IdScheme::default();
        let text = "MOD-1, mod-22, MOD-003 and MOD-1 again";
        assert!(scheme.item_refs(text).is_empty());
        assert_eq!(scheme.group_refs(text), vec!["MOD-0003"]);
        assert_eq!(scheme.malformed_group_refs(text), vec!["MOD-1", "MOD-22"]);
    }

    #[test]
    fn custom_prefix_is_respected() {
        let scheme = IdScheme::new("grp").expect("scheme");
        assert_eq!(scheme.group_refs("needs GRP-01 and GRP-0001"), vec!["GRP-0001"]);
        assert_eq!(scheme.item_refs("MOD-0001"), vec!["MOD-0001"]);
        assert!(IdScheme::new("g-1").is_err());
    }
}
