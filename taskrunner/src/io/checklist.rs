//! Checklist document on disk: load and mark-done.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, warn};

use crate::core::catalog::{Catalog, parse_catalog};
use crate::core::ids::{IdScheme, SYNTHETIC_PREFIX, leading_id};
use crate::io::config::write_atomic;

static PENDING_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([-*]\s*)\[\s*\]").expect("pending marker pattern"));

/// Read and parse the checklist. `Ok(None)` when the file does not exist.
///
/// Catalog errors are returned as typed [`crate::core::catalog::CatalogError`]
/// inside the `anyhow` chain.
pub fn load_checklist(path: &Path, scheme: &IdScheme) -> Result<Option<Catalog>> {
    if !path.exists() {
        debug!(path = %path.display(), "checklist missing");
        return Ok(None);
    }
    let content = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let catalog = parse_catalog(&content, scheme)?;
    for warning in &catalog.warnings {
        warn!(path = %path.display(), "{warning}");
    }
    Ok(Some(catalog))
}

/// Flip the pending marker on line `line_index` to `[x]`, leaving every
/// other byte of the document untouched.
///
/// The line must still carry `id`; a document edited under the run is an
/// error rather than a silent write to the wrong entry.
pub fn mark_item_done(path: &Path, line_index: usize, id: &str) -> Result<()> {
    let content = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut lines: Vec<&str> = content.split('\n').collect();
    let line = lines
        .get(line_index)
        .copied()
        .ok_or_else(|| anyhow!("{}: no line {} for {id}", path.display(), line_index + 1))?;

    let (body, cr) = match line.strip_suffix('\r') {
        Some(body) => (body, "\r"),
        None => (line, ""),
    };
    let caps = PENDING_MARKER_RE
        .captures(body)
        .ok_or_else(|| anyhow!("{}: line {} is not a pending entry", path.display(), line_index + 1))?;
    let marker_end = caps.get(0).map_or(0, |m| m.end());
    let rest = &body[marker_end..];
    let same_entry = match leading_id(rest.trim_start()) {
        Some(found) => found == id,
        None => id.starts_with(SYNTHETIC_PREFIX),
    };
    if !same_entry {
        return Err(anyhow!(
            "{}: line {} no longer refers to {id}",
            path.display(),
            line_index + 1
        ));
    }

    let replaced = format!("{}[x]{rest}{cr}", &caps[1]);
    lines[line_index] = &replaced;
    write_atomic(path, &lines.join("\n"))?;
    debug!(item = %id, line = line_index + 1, "marked done");
    Ok(())
}
