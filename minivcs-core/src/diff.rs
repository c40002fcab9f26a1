//! Change computation
//!
//! Compares a commit's files against its parent's and produces the per-path
//! [`ChangeSet`] stored with the commit. Modified files get a line-based
//! unified diff with `a/<path>` / `b/<path>` labels and three lines of context.
//! Output depends only on the two snapshots, so every backend records
//! byte-identical change sets for the same input.

use similar::{Algorithm, DiffTag, capture_diff_slices, group_diff_ops};
use std::collections::{BTreeMap, BTreeSet};

use crate::commit::{ChangeRecord, ChangeSet};
use crate::object::ObjectId;

/// Lines of context around each hunk
pub const CONTEXT_LINES: usize = 3;

/// A file as seen by the change engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub hash: ObjectId,
    pub content: String,
}

impl FileVersion {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            hash: ObjectId::for_content(&content),
            content,
        }
    }
}

/// path -> file, for one commit
pub type Snapshot = BTreeMap<String, FileVersion>;

/// Compute the change set of `current` relative to `parent`
///
/// Without a parent every file is `added`. Paths whose hash did not change are
/// left out of the result entirely.
pub fn compute_changes(parent: Option<&Snapshot>, current: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::new();

    let Some(parent) = parent else {
        for (path, file) in current {
            changes.insert(path.clone(), ChangeRecord::added(file.hash));
        }
        return changes;
    };

    let paths: BTreeSet<&String> = parent.keys().chain(current.keys()).collect();
    for path in paths {
        let record = match (parent.get(path), current.get(path)) {
            (None, Some(cur)) => ChangeRecord::added(cur.hash),
            (Some(prev), None) => ChangeRecord::deleted(prev.hash),
            (Some(prev), Some(cur)) if prev.hash != cur.hash => ChangeRecord::modified(
                prev.hash,
                cur.hash,
                unified_diff(path, &prev.content, &cur.content),
            ),
            _ => continue,
        };
        changes.insert(path.clone(), record);
    }
    changes
}

/// Render a unified diff between two versions of `path`
///
/// Lines are compared without their terminators and the output lines are
/// joined with `\n`, with no trailing newline. Returns an empty string when
/// the two sides have identical lines (e.g. only a final newline differs).
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);
    let groups = group_diff_ops(ops, CONTEXT_LINES);
    if groups.is_empty() {
        return String::new();
    }

    let mut out = vec![format!("--- a/{path}"), format!("+++ b/{path}")];
    for group in &groups {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        out.push(format!(
            "@@ -{} +{} @@",
            format_range(first.old_range().start, last.old_range().end),
            format_range(first.new_range().start, last.new_range().end),
        ));
        for op in group {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => {
                    out.extend(old_lines[old_range].iter().map(|l| format!(" {l}")));
                }
                DiffTag::Delete => {
                    out.extend(old_lines[old_range].iter().map(|l| format!("-{l}")));
                }
                DiffTag::Insert => {
                    out.extend(new_lines[new_range].iter().map(|l| format!("+{l}")));
                }
                DiffTag::Replace => {
                    out.extend(old_lines[old_range].iter().map(|l| format!("-{l}")));
                    out.extend(new_lines[new_range].iter().map(|l| format!("+{l}")));
                }
            }
        }
    }
    out.join("\n")
}

/// Hunk range in `start,length` form; a single line omits the length and an
/// empty range points at the line before it.
fn format_range(start: usize, end: usize) -> String {
    let length = end - start;
    match length {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, length),
    }
}
