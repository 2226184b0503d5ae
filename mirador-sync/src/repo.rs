//! The single shared working clone and the git primitives run against it.
//!
//! Every method here mutates (or reads) one on-disk repository. Callers must
//! serialize access; [`crate::Switcher`] does so with one mutex around the
//! handle.

use std::path::{Path, PathBuf};

use mirador_core::types::CommitId;

use crate::error::{io_err, SwitchError};
use crate::git::{run_git, GitOutput, Identity, Transport};

/// Result of a strict `--no-ff` merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// Textual conflicts; the repository is left mid-merge until aborted.
    Conflicted { paths: Vec<String> },
}

#[derive(Debug)]
pub struct RepositoryHandle {
    path: PathBuf,
    transport: Transport,
    identity: Identity,
}

impl RepositoryHandle {
    /// Open an existing clone. Fails if `path` is not inside a git work tree.
    pub fn open(
        path: impl Into<PathBuf>,
        transport: Transport,
        identity: Identity,
    ) -> Result<Self, SwitchError> {
        let path = path.into();
        if !path.is_dir() {
            return Err(io_err(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "repository directory missing"),
            ));
        }
        run_git(&path, &["rev-parse", "--is-inside-work-tree"], None)?
            .ok_or_git("rev-parse --is-inside-work-tree")?;
        Ok(Self {
            path,
            transport,
            identity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn git(&self, args: &[&str]) -> Result<GitOutput, SwitchError> {
        run_git(&self.path, args, None)
    }

    fn git_as_bot(&self, args: &[&str]) -> Result<GitOutput, SwitchError> {
        let mut full: Vec<String> = self.identity.config_args().into();
        full.extend(args.iter().map(|a| a.to_string()));
        run_git(&self.path, &full, None)
    }

    // -----------------------------------------------------------------------
    // Network
    // -----------------------------------------------------------------------

    /// Force-fetch all branches of `remote`, dropping tracking refs deleted upstream.
    pub fn fetch(&self, remote: &str) -> Result<(), SwitchError> {
        let out = run_git(
            &self.path,
            &["fetch", "--prune", "--force", "--no-tags", remote],
            Some(&self.transport),
        )?;
        if !out.success {
            return Err(SwitchError::Transport {
                remote: remote.to_string(),
                detail: out.stderr,
            });
        }
        tracing::debug!(remote, "fetched");
        Ok(())
    }

    /// Overwrite `refs/heads/<dst_branch>` on `remote` with `src`, unconditionally.
    pub fn push_force(&self, remote: &str, src: &str, dst_branch: &str) -> Result<(), SwitchError> {
        let refspec = format!("{src}:refs/heads/{dst_branch}");
        let out = run_git(
            &self.path,
            &["push", "--force", "--quiet", remote, &refspec],
            Some(&self.transport),
        )?;
        if !out.success {
            return Err(SwitchError::Transport {
                remote: remote.to_string(),
                detail: out.stderr,
            });
        }
        tracing::debug!(remote, refspec = %refspec, "pushed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Working tree
    // -----------------------------------------------------------------------

    /// Point `branch` at `target`, check it out, and discard every local change.
    pub fn reset_branch(&self, branch: &str, target: &str) -> Result<(), SwitchError> {
        // Clears leftover merge state and tracked modifications on whatever is
        // checked out. A failure here is tolerated: the forced checkout below
        // overwrites the tree anyway, and fails loudly if it cannot.
        let reset = self.git(&["reset", "--hard", "--quiet"])?;
        if !reset.success {
            tracing::debug!(stderr = %reset.stderr, "pre-checkout reset failed, continuing");
        }
        self.git(&["checkout", "--force", "--quiet", "-B", branch, target])?
            .ok_or_git("checkout")?;
        Ok(())
    }

    /// Merge `rev` into HEAD with a merge commit, failing on any textual conflict.
    pub fn merge_no_ff(&self, rev: &str, message: &str) -> Result<MergeOutcome, SwitchError> {
        let out = self.git_as_bot(&[
            "-c",
            "rerere.enabled=false",
            "merge",
            "--no-ff",
            "--no-edit",
            "-m",
            message,
            rev,
        ])?;
        if out.success {
            return Ok(MergeOutcome::Merged);
        }

        let paths = self.unmerged_paths()?;
        if paths.is_empty() {
            return Err(SwitchError::Git {
                command: "merge".to_string(),
                detail: out.stderr,
            });
        }
        Ok(MergeOutcome::Conflicted { paths })
    }

    pub fn abort_merge(&self) -> Result<(), SwitchError> {
        self.git(&["merge", "--abort"])?.ok_or_git("merge --abort")?;
        Ok(())
    }

    pub fn is_merging(&self) -> Result<bool, SwitchError> {
        Ok(self
            .git(&["rev-parse", "--quiet", "--verify", "MERGE_HEAD"])?
            .success)
    }

    fn unmerged_paths(&self) -> Result<Vec<String>, SwitchError> {
        let out = self
            .git(&["diff", "--name-only", "--diff-filter=U", "-z"])?
            .ok_or_git("diff --diff-filter=U")?;
        let mut paths: Vec<String> = out
            .stdout
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        paths.dedup();
        Ok(paths)
    }

    /// Write `rel_path` (relative to the work tree) and commit only that file.
    pub fn commit_file(
        &self,
        rel_path: &str,
        content: &str,
        message: &str,
    ) -> Result<CommitId, SwitchError> {
        let full = self.path.join(rel_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::write(&full, content).map_err(|e| io_err(&full, e))?;

        self.git(&["add", "--", rel_path])?.ok_or_git("add")?;
        self.git_as_bot(&["commit", "--no-verify", "--allow-empty", "--quiet", "-m", message])?
            .ok_or_git("commit")?;
        self.head()
    }

    /// True when there are no tracked modifications, untracked files, or merge in progress.
    pub fn is_clean(&self) -> Result<bool, SwitchError> {
        let out = self
            .git(&["status", "--porcelain=v1", "-uall"])?
            .ok_or_git("status")?;
        Ok(out.stdout.trim().is_empty() && !self.is_merging()?)
    }

    // -----------------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------------

    /// Resolve `rev` to a commit, `None` if it does not name one.
    pub fn resolve(&self, rev: &str) -> Result<Option<CommitId>, SwitchError> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.git(&["rev-parse", "--quiet", "--verify", &spec])?;
        let id = out.stdout.trim();
        if out.success && !id.is_empty() {
            Ok(Some(CommitId::from(id)))
        } else {
            Ok(None)
        }
    }

    pub fn head(&self) -> Result<CommitId, SwitchError> {
        self.resolve("HEAD")?.ok_or_else(|| SwitchError::Git {
            command: "rev-parse HEAD".to_string(),
            detail: "HEAD does not point at a commit".to_string(),
        })
    }

    pub fn remote_url(&self, name: &str) -> Result<Option<String>, SwitchError> {
        let out = self.git(&["remote", "get-url", name])?;
        if out.success {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<(), SwitchError> {
        self.git(&["remote", "add", name, url])?
            .ok_or_git("remote add")?;
        Ok(())
    }

    /// Lowest common ancestor of two commits; `None` for unrelated histories.
    pub fn merge_base(&self, a: &str, b: &str) -> Result<Option<CommitId>, SwitchError> {
        let out = self.git(&["merge-base", a, b])?;
        let id = out.stdout.trim();
        if out.success && !id.is_empty() {
            return Ok(Some(CommitId::from(id)));
        }
        if out.stderr.is_empty() {
            return Ok(None);
        }
        Err(SwitchError::Git {
            command: "merge-base".to_string(),
            detail: out.stderr,
        })
    }

    /// Raw `--name-status -z` output comparing two trees, with rename detection.
    pub fn name_status(&self, base: &str, to: &str) -> Result<String, SwitchError> {
        let out = self
            .git(&[
                "diff",
                "--name-status",
                "-z",
                "-M",
                "--no-ext-diff",
                "--no-color",
                base,
                to,
                "--",
            ])?
            .ok_or_git("diff --name-status")?;
        Ok(out.stdout)
    }
}
