//! The switch sequence: refresh the master mirror, put the requested ref on
//! the working branch, publish it to the instance's sync branch, then tell the
//! site and compute what changed.
//!
//! Everything that touches the shared clone happens under one mutex. The site
//! notification runs with the mutex released; by then the git side is already
//! published and is never rolled back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use mirador_core::{CommitId, DiffEntry, Instance, Remote, Settings, SwitchResult, NEWS_PREFIX};

use crate::diff;
use crate::error::SwitchError;
use crate::git::{Identity, Transport};
use crate::notify::SiteHook;
use crate::remotes::RemoteRegistry;
use crate::repo::{MergeOutcome, RepositoryHandle};

/// Fetch failures that mean the fork itself does not exist.
const MISSING_REPOSITORY_MARKERS: &[&str] = &[
    "does not appear to be a git repository",
    "Repository not found",
];

/// Branch and remote names the sequence works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOptions {
    pub upstream_remote: String,
    pub upstream_branch: String,
    pub origin_remote: String,
    pub mirror_branch: String,
    pub work_branch: String,
    pub merge_message: String,
}

impl SwitchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            upstream_remote: settings.upstream_remote.clone(),
            upstream_branch: settings.upstream_branch.clone(),
            origin_remote: settings.origin_remote.clone(),
            mirror_branch: settings.mirror_branch.clone(),
            work_branch: settings.work_branch.clone(),
            merge_message: settings.merge_message.clone(),
        }
    }
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// "Show `git_ref` from `namespace`", optionally with upstream master merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub namespace: String,
    pub git_ref: String,
    #[serde(default)]
    pub merge_master: bool,
}

impl SwitchRequest {
    pub fn new(namespace: impl Into<String>, git_ref: impl Into<String>, merge_master: bool) -> Self {
        Self {
            namespace: namespace.into(),
            git_ref: git_ref.into(),
            merge_master,
        }
    }
}

/// A news post to preview on top of upstream master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsPost {
    pub content: String,
    pub year: String,
    pub filename: String,
}

impl NewsPost {
    pub fn new(
        content: impl Into<String>,
        year: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            year: year.into(),
            filename: filename.into(),
        }
    }

    pub fn validate(&self) -> Result<(), SwitchError> {
        if self.year.len() != 4 || !self.year.chars().all(|c| c.is_ascii_digit()) {
            return Err(SwitchError::InvalidInput(format!(
                "year must be four digits, got '{}'",
                self.year
            )));
        }
        let name = &self.filename;
        let single_component = !name.contains('/') && !name.contains('\\');
        if !single_component
            || name.starts_with('.')
            || name.starts_with('-')
            || name.len() <= ".md".len()
            || !name.ends_with(".md")
        {
            return Err(SwitchError::InvalidInput(format!(
                "'{name}' is not a valid news file name"
            )));
        }
        Ok(())
    }

    /// Path of the post inside the content repository.
    pub fn path(&self) -> String {
        format!("{NEWS_PREFIX}{}/{}", self.year, self.filename)
    }
}

/// Result of one site notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NotifyStatus {
    Delivered,
    Failed { reason: String },
    /// Not attempted because an earlier notification failed.
    Skipped,
}

impl NotifyStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, NotifyStatus::Delivered)
    }
}

/// Published git state plus what happened at the site boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub result: SwitchResult,
    /// Master-mirror commit the diff was computed against.
    pub from: CommitId,
    pub wiki: NotifyStatus,
    /// `None` when the diff touches no news posts.
    pub news: Option<NotifyStatus>,
}

impl SwitchOutcome {
    /// Reason of the first failed notification, if any.
    pub fn notify_failure(&self) -> Option<&str> {
        fn failed(status: &NotifyStatus) -> Option<&str> {
            match status {
                NotifyStatus::Failed { reason } => Some(reason.as_str()),
                _ => None,
            }
        }
        failed(&self.wiki).or_else(|| self.news.as_ref().and_then(failed))
    }

    /// Collapse to a single result: any notification failure becomes [`SwitchError::Notify`].
    pub fn into_result(self) -> Result<SwitchResult, SwitchError> {
        if let Some(reason) = self.notify_failure() {
            return Err(SwitchError::Notify {
                detail: reason.to_string(),
            });
        }
        Ok(self.result)
    }
}

pub struct Switcher {
    repo: Mutex<RepositoryHandle>,
    remotes: RemoteRegistry,
    hook: Arc<dyn SiteHook>,
    options: SwitchOptions,
}

impl Switcher {
    pub fn new(
        repo: RepositoryHandle,
        remotes: RemoteRegistry,
        hook: Arc<dyn SiteHook>,
        options: SwitchOptions,
    ) -> Self {
        Self {
            repo: Mutex::new(repo),
            remotes,
            hook,
            options,
        }
    }

    /// Open the configured clone and wire everything from `settings`.
    pub fn from_settings(settings: &Settings, hook: Arc<dyn SiteHook>) -> Result<Self, SwitchError> {
        let transport = settings
            .ssh_key
            .as_ref()
            .map(Transport::with_ssh_key)
            .unwrap_or_else(Transport::ambient);
        let identity = Identity::new(
            settings.merge_author_name.clone(),
            settings.merge_author_email.clone(),
        );
        let repo = RepositoryHandle::open(&settings.repository_path, transport, identity)?;
        Ok(Self::new(
            repo,
            RemoteRegistry::from_settings(settings),
            hook,
            SwitchOptions::from_settings(settings),
        ))
    }

    pub fn options(&self) -> &SwitchOptions {
        &self.options
    }

    pub fn remotes(&self) -> &RemoteRegistry {
        &self.remotes
    }

    fn lock_repo(&self) -> MutexGuard<'_, RepositoryHandle> {
        // Poisoning is ignored: every switch starts from a hard reset.
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Show `request` on `instance`.
    ///
    /// Notification failures never produce `Err`; they are reported in the
    /// returned [`SwitchOutcome`].
    pub fn switch_branch(
        &self,
        instance: &Instance,
        request: &SwitchRequest,
    ) -> Result<SwitchOutcome, SwitchError> {
        tracing::info!(
            instance = %instance.id,
            namespace = %request.namespace,
            git_ref = %request.git_ref,
            merge_master = request.merge_master,
            "switch requested"
        );

        let (from, to) = {
            let repo = self.lock_repo();
            let from = self.update_master(&repo)?;
            let remote = self.remotes.resolve(&*repo, &request.namespace)?;
            self.fetch_target(&repo, &remote, &request.namespace)?;
            let target = resolve_target(&repo, &remote.name, &request.git_ref)?;
            repo.reset_branch(&self.options.work_branch, target.as_str())?;
            if request.merge_master {
                self.merge_master(&repo, &from)?;
            }
            self.publish(&repo, instance)?;
            (from, repo.head()?)
        };

        self.notify_and_diff(instance, from, to)
    }

    /// Commit `post` on top of fresh upstream master and show that on `instance`.
    pub fn push_news_preview(
        &self,
        instance: &Instance,
        post: &NewsPost,
    ) -> Result<SwitchOutcome, SwitchError> {
        post.validate()?;
        let path = post.path();
        tracing::info!(instance = %instance.id, path = %path, "news preview requested");

        let (from, to) = {
            let repo = self.lock_repo();
            let from = self.update_master(&repo)?;
            repo.commit_file(&path, &post.content, &format!("Preview news post {path}"))?;
            self.publish(&repo, instance)?;
            (from, repo.head()?)
        };

        self.notify_and_diff(instance, from, to)
    }

    /// Read-only content diff between two revisions of the shared clone.
    pub fn diff(&self, from: &str, to: &str) -> Result<Vec<DiffEntry>, SwitchError> {
        let repo = self.lock_repo();
        let resolve = |rev: &str| {
            if rev.starts_with('-') {
                return Err(SwitchError::InvalidInput(format!("unknown revision '{rev}'")));
            }
            repo.resolve(rev)?
                .ok_or_else(|| SwitchError::InvalidInput(format!("unknown revision '{rev}'")))
        };
        let from = resolve(from)?;
        let to = resolve(to)?;
        diff::diff(&repo, &from, &to)
    }

    /// Refresh the local master mirror from upstream and mirror it to origin.
    fn update_master(&self, repo: &RepositoryHandle) -> Result<CommitId, SwitchError> {
        let opts = &self.options;
        repo.fetch(&opts.upstream_remote)?;
        let upstream_tip = format!(
            "refs/remotes/{}/{}",
            opts.upstream_remote, opts.upstream_branch
        );
        repo.reset_branch(&opts.mirror_branch, &upstream_tip)?;
        repo.push_force(
            &opts.origin_remote,
            &format!("refs/heads/{}", opts.mirror_branch),
            &opts.mirror_branch,
        )?;
        let from = repo.head()?;
        tracing::debug!(from = %from.short(), "master mirror refreshed");
        Ok(from)
    }

    fn fetch_target(
        &self,
        repo: &RepositoryHandle,
        remote: &Remote,
        namespace: &str,
    ) -> Result<(), SwitchError> {
        match repo.fetch(&remote.name) {
            Err(SwitchError::Transport { detail, .. })
                if MISSING_REPOSITORY_MARKERS.iter().any(|m| detail.contains(m)) =>
            {
                Err(SwitchError::InvalidRemote {
                    namespace: namespace.to_string(),
                    reason: detail,
                })
            }
            other => other,
        }
    }

    /// Merge `from` into the working branch; on conflict abort and report the paths.
    fn merge_master(&self, repo: &RepositoryHandle, from: &CommitId) -> Result<(), SwitchError> {
        let outcome = match repo.merge_no_ff(from.as_str(), &self.options.merge_message) {
            Ok(outcome) => outcome,
            Err(err) => {
                abort_if_merging(repo);
                return Err(err);
            }
        };
        match outcome {
            MergeOutcome::Merged => Ok(()),
            MergeOutcome::Conflicted { paths } => {
                tracing::warn!(paths = ?paths, "merge of master conflicted, aborting");
                abort_if_merging(repo);
                Err(SwitchError::MergeConflict { paths })
            }
        }
    }

    fn publish(&self, repo: &RepositoryHandle, instance: &Instance) -> Result<(), SwitchError> {
        let branch = instance.id.sync_branch();
        repo.push_force(&self.options.origin_remote, "HEAD", &branch)?;
        tracing::info!(instance = %instance.id, branch = %branch, "published");
        Ok(())
    }

    fn notify_and_diff(
        &self,
        instance: &Instance,
        from: CommitId,
        to: CommitId,
    ) -> Result<SwitchOutcome, SwitchError> {
        let wiki = match self.hook.notify_wiki_update(instance, &from, &to) {
            Ok(()) => NotifyStatus::Delivered,
            Err(err) => {
                tracing::warn!(instance = %instance.id, error = %err, "wiki update notification failed");
                NotifyStatus::Failed { reason: err.reason }
            }
        };

        let diff = {
            let repo = self.lock_repo();
            diff::diff(&repo, &from, &to)?
        };
        let result = SwitchResult { diff, new_head: to };

        let news = if !result.has_news() {
            None
        } else if !wiki.is_delivered() {
            Some(NotifyStatus::Skipped)
        } else {
            Some(match self.hook.notify_news_update(instance) {
                Ok(()) => NotifyStatus::Delivered,
                Err(err) => {
                    tracing::warn!(instance = %instance.id, error = %err, "news update notification failed");
                    NotifyStatus::Failed { reason: err.reason }
                }
            })
        };

        tracing::info!(
            instance = %instance.id,
            from = %from.short(),
            to = %result.new_head.short(),
            changed = result.diff.len(),
            news = result.has_news(),
            "switch complete"
        );
        Ok(SwitchOutcome {
            result,
            from,
            wiki,
            news,
        })
    }
}

/// `refs/remotes/<namespace>/<ref>`, or a commit id reachable in the clone.
fn resolve_target(
    repo: &RepositoryHandle,
    namespace: &str,
    git_ref: &str,
) -> Result<CommitId, SwitchError> {
    let unknown = || SwitchError::UnknownRef {
        namespace: namespace.to_string(),
        git_ref: git_ref.to_string(),
    };
    if git_ref.is_empty() || git_ref.starts_with('-') {
        return Err(unknown());
    }
    if let Some(id) = repo.resolve(&format!("refs/remotes/{namespace}/{git_ref}"))? {
        return Ok(id);
    }
    if looks_like_commit_id(git_ref) {
        if let Some(id) = repo.resolve(git_ref)? {
            return Ok(id);
        }
    }
    Err(unknown())
}

fn looks_like_commit_id(s: &str) -> bool {
    (7..=40).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn abort_if_merging(repo: &RepositoryHandle) {
    match repo.is_merging() {
        Ok(true) => {
            if let Err(err) = repo.abort_merge() {
                tracing::error!(error = %err, "could not abort merge");
            }
        }
        Ok(false) => {}
        Err(err) => tracing::error!(error = %err, "could not inspect merge state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirador_core::ChangeType;
    use rstest::rstest;

    #[rstest]
    #[case("2024", "example.md", true)]
    #[case("24", "example.md", false)]
    #[case("20x4", "example.md", false)]
    #[case("2024", "example.txt", false)]
    #[case("2024", ".md", false)]
    #[case("2024", ".hidden.md", false)]
    #[case("2024", "-rf.md", false)]
    #[case("2024", "../escape.md", false)]
    #[case("2024", "sub/dir.md", false)]
    fn news_post_validation(#[case] year: &str, #[case] filename: &str, #[case] ok: bool) {
        let post = NewsPost::new("# Hello\n", year, filename);
        assert_eq!(post.validate().is_ok(), ok, "{year}/{filename}");
    }

    #[test]
    fn news_post_path() {
        let post = NewsPost::new("", "2024", "example.md");
        assert_eq!(post.path(), "news/2024/example.md");
    }

    #[rstest]
    #[case("abcdef1", true)]
    #[case("0123456789abcdef0123456789abcdef01234567", true)]
    #[case("abc", false)]
    #[case("feature-x", false)]
    #[case("0123456789abcdef0123456789abcdef012345678", false)]
    fn commit_id_shape(#[case] s: &str, #[case] expected: bool) {
        assert_eq!(looks_like_commit_id(s), expected);
    }

    fn outcome(wiki: NotifyStatus, news: Option<NotifyStatus>) -> SwitchOutcome {
        SwitchOutcome {
            result: SwitchResult {
                diff: vec![DiffEntry {
                    path: "news/2024/a.md".to_string(),
                    change_type: ChangeType::Add,
                }],
                new_head: CommitId::from("bbb"),
            },
            from: CommitId::from("aaa"),
            wiki,
            news,
        }
    }

    #[test]
    fn delivered_outcome_collapses_to_ok() {
        let out = outcome(NotifyStatus::Delivered, Some(NotifyStatus::Delivered));
        assert_eq!(out.notify_failure(), None);
        assert_eq!(out.into_result().unwrap().new_head, CommitId::from("bbb"));
    }

    #[test]
    fn failed_news_collapses_to_notify_error() {
        let out = outcome(
            NotifyStatus::Delivered,
            Some(NotifyStatus::Failed {
                reason: "HTTP 502".to_string(),
            }),
        );
        let err = out.into_result().unwrap_err();
        assert!(matches!(err, SwitchError::Notify { ref detail } if detail == "HTTP 502"));
    }

    #[test]
    fn wiki_failure_wins_over_skipped_news() {
        let out = outcome(
            NotifyStatus::Failed {
                reason: "refused".to_string(),
            },
            Some(NotifyStatus::Skipped),
        );
        assert_eq!(out.notify_failure(), Some("refused"));
    }

    #[test]
    fn notify_status_serializes_tagged() {
        let json = serde_json::to_value(NotifyStatus::Failed {
            reason: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "x");
    }
}
