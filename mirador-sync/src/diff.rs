//! Content diff between two commits.
//!
//! Compares the merge-base of `from`/`to` with `to`, so only what the target
//! side introduced is reported. Deletions and non-content files are dropped.

use mirador_core::{ChangeType, CommitId, DiffEntry, CONTENT_EXTENSION};

use crate::error::SwitchError;
use crate::repo::RepositoryHandle;

/// Object name of the empty tree, used as the base for unrelated histories.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Changed content files reachable from `to` but not from the common ancestor.
///
/// Read-only; the result is in git's output order.
pub fn diff(
    repo: &RepositoryHandle,
    from: &CommitId,
    to: &CommitId,
) -> Result<Vec<DiffEntry>, SwitchError> {
    let base = match repo.merge_base(from.as_str(), to.as_str())? {
        Some(base) => base,
        None => {
            tracing::debug!(from = %from.short(), to = %to.short(), "no merge base, diffing against empty tree");
            CommitId::from(EMPTY_TREE)
        }
    };
    let raw = repo.name_status(base.as_str(), to.as_str())?;
    let entries: Vec<DiffEntry> = parse_name_status(&raw)
        .into_iter()
        .filter(is_content_change)
        .collect();
    tracing::debug!(from = %from.short(), to = %to.short(), entries = entries.len(), "diff computed");
    Ok(entries)
}

/// Parse `git diff --name-status -z`. Rename and copy records keep the destination path.
pub fn parse_name_status(raw: &str) -> Vec<DiffEntry> {
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());
    let mut entries = Vec::new();

    while let Some(status) = fields.next() {
        let change_type = ChangeType::from_status(status);
        let path = match change_type {
            Some(ct) if ct.has_source_path() => {
                let _source = fields.next();
                fields.next()
            }
            _ => fields.next(),
        };
        let (Some(change_type), Some(path)) = (change_type, path) else {
            continue;
        };
        entries.push(DiffEntry {
            path: path.to_string(),
            change_type,
        });
    }
    entries
}

/// Kept entries: anything but a deletion, on a content file.
pub fn is_content_change(entry: &DiffEntry) -> bool {
    entry.change_type != ChangeType::Delete && is_content_path(&entry.path)
}

fn is_content_path(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| ext == CONTENT_EXTENSION)
}
