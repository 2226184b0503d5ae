//! Domain types for Mirador.
//!
//! All types are serializable/deserializable via serde + serde_yaml so they can
//! be persisted by the state store and carried over the daemon protocol.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// File extension (without the dot) of the content files the site renders.
pub const CONTENT_EXTENSION: &str = "md";

/// Path prefix of news posts inside the content repository.
pub const NEWS_PREFIX: &str = "news/";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric identifier of a deployed preview instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for InstanceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl InstanceId {
    /// Name of the branch on origin that tracks what this instance shows.
    pub fn sync_branch(&self) -> String {
        format!("sync-{}", self.0)
    }
}

/// A full commit object name as printed by `git rev-parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines and tables.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(10);
        &self.0[..end]
    }
}

// ---------------------------------------------------------------------------
// Remotes and instances
// ---------------------------------------------------------------------------

/// A git remote named after the namespace (fork owner) it points to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// One deployable preview environment and its control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    /// Chat channel (or other external id) that drives this instance.
    pub control_channel: String,
    /// Port the instance's site listens on; the site hook is reached through it.
    pub port: u16,
}

/// Review link associated with a preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub id: u64,
    pub number: u64,
}

// ---------------------------------------------------------------------------
// Preview state
// ---------------------------------------------------------------------------

/// What an instance currently shows, and until when it is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewState {
    pub namespace: String,
    pub git_ref: String,
    #[serde(default)]
    pub redate_news: bool,
    #[serde(default)]
    pub merge_master: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestRef>,
    pub available_at: DateTime<Utc>,
}

impl PreviewState {
    /// State for a brand-new switch, claimed for `lease` starting at `now`.
    pub fn fresh(
        namespace: impl Into<String>,
        git_ref: impl Into<String>,
        merge_master: bool,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            git_ref: git_ref.into(),
            redate_news: false,
            merge_master,
            pull_request: None,
            available_at: now + lease,
        }
    }

    pub fn with_redate(self, redate_news: bool) -> Self {
        Self {
            redate_news,
            ..self
        }
    }

    pub fn with_master(self, merge_master: bool) -> Self {
        Self {
            merge_master,
            ..self
        }
    }

    pub fn with_pull_request(self, pull_request: Option<PullRequestRef>) -> Self {
        Self {
            pull_request,
            ..self
        }
    }

    /// Refresh the reservation so the instance stays out of automatic reuse.
    pub fn claim(self, now: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            available_at: now + lease,
            ..self
        }
    }

    /// Give the instance back for automatic reuse immediately.
    pub fn release(self, now: DateTime<Utc>) -> Self {
        Self {
            available_at: now,
            ..self
        }
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        now >= self.available_at
    }
}

// ---------------------------------------------------------------------------
// Diffs
// ---------------------------------------------------------------------------

/// Kind of change reported by a tree comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Rename,
    Copy,
    TypeChange,
    Delete,
}

impl ChangeType {
    /// Parse the status column of `git diff --name-status` (`A`, `M`, `R100`, ...).
    pub fn from_status(status: &str) -> Option<Self> {
        match status.chars().next()? {
            'A' => Some(Self::Add),
            'M' => Some(Self::Modify),
            'R' => Some(Self::Rename),
            'C' => Some(Self::Copy),
            'T' => Some(Self::TypeChange),
            'D' => Some(Self::Delete),
            _ => None,
        }
    }

    /// Rename and copy records carry a source and a destination path.
    pub fn has_source_path(&self) -> bool {
        matches!(self, Self::Rename | Self::Copy)
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Rename => "rename",
            ChangeType::Copy => "copy",
            ChangeType::TypeChange => "typechange",
            ChangeType::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// One changed content file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub change_type: ChangeType,
}

impl DiffEntry {
    pub fn is_news(&self) -> bool {
        self.path.starts_with(NEWS_PREFIX)
    }
}

/// Outcome of the git side of one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchResult {
    pub diff: Vec<DiffEntry>,
    pub new_head: CommitId,
}

impl SwitchResult {
    pub fn has_news(&self) -> bool {
        self.diff.iter().any(DiffEntry::is_news)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("timestamp")
    }

    #[test]
    fn sync_branch_name() {
        assert_eq!(InstanceId(3).sync_branch(), "sync-3");
    }

    #[test]
    fn change_type_from_status() {
        assert_eq!(ChangeType::from_status("A"), Some(ChangeType::Add));
        assert_eq!(ChangeType::from_status("R087"), Some(ChangeType::Rename));
        assert_eq!(ChangeType::from_status("D"), Some(ChangeType::Delete));
        assert_eq!(ChangeType::from_status("X"), None);
        assert_eq!(ChangeType::from_status(""), None);
    }

    #[test]
    fn diff_entries_collect_into_ordered_sets() {
        let set: std::collections::BTreeSet<(String, ChangeType)> = [
            ("wiki/b.md".to_string(), ChangeType::Modify),
            ("news/a.md".to_string(), ChangeType::Add),
            ("wiki/b.md".to_string(), ChangeType::Modify),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        assert!(ChangeType::Add < ChangeType::Delete);
    }

    #[test]
    fn has_news_checks_prefix() {
        let mut result = SwitchResult {
            diff: vec![DiffEntry {
                path: "wiki/Legal/Terms.md".to_string(),
                change_type: ChangeType::Modify,
            }],
            new_head: CommitId::from("abc"),
        };
        assert!(!result.has_news());
        result.diff.push(DiffEntry {
            path: "news/2024/example.md".to_string(),
            change_type: ChangeType::Add,
        });
        assert!(result.has_news());
    }

    #[test]
    fn claim_and_release_move_availability() {
        let lease = Duration::minutes(30);
        let state = PreviewState::fresh("forkA", "feature-x", false, at(1_000), lease);
        assert!(!state.is_available(at(1_000)));
        assert!(state.is_available(at(1_000 + 30 * 60)));

        let claimed = state.claim(at(5_000), lease);
        assert_eq!(claimed.available_at, at(5_000 + 30 * 60));

        let released = claimed.release(at(5_100));
        assert!(released.is_available(at(5_100)));
    }

    #[test]
    fn flag_builders_keep_other_fields() {
        let state = PreviewState::fresh("forkA", "feature-x", false, at(0), Duration::zero())
            .with_redate(true)
            .with_master(true)
            .with_pull_request(Some(PullRequestRef { id: 7, number: 42 }));
        assert!(state.redate_news);
        assert!(state.merge_master);
        assert_eq!(state.namespace, "forkA");
        assert_eq!(state.pull_request.map(|pr| pr.number), Some(42));
    }

    #[test]
    fn commit_short_handles_short_ids() {
        assert_eq!(CommitId::from("abc").short(), "abc");
        assert_eq!(
            CommitId::from("0123456789abcdef").short(),
            "0123456789"
        );
    }

    #[test]
    fn preview_state_serde_roundtrip() {
        let state = PreviewState::fresh("forkA", "feature-x", true, at(42), Duration::hours(1));
        let yaml = serde_yaml::to_string(&state).expect("serialize");
        assert!(!yaml.contains("pull_request"), "None review link is omitted");
        let back: PreviewState = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, state);
    }
}
