//! Throwaway repository fleet for git-backed tests.
//!
//! Layout under one temp dir:
//!
//! ```text
//! upstream.git              bare, master = v2 (Terms.md line 1 edited)
//! origin.git                bare, receives master + sync-<id>
//! forks/forkA/website.git   bare, branches feature-x, conflict, master
//! clone/                    shared working clone, remotes upstream + origin
//! seed/                     scratch repo used to author all commits
//! home/                     mirador home for state files
//! ```
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mirador_core::store::add_instance_at;
use mirador_core::{CommitId, Instance, InstanceId, Settings, YamlStateStore};
use mirador_sync::{NotifyError, PreviewService, SiteHook, Switcher};
use tempfile::TempDir;

pub fn have_git() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking with stderr on failure. Returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn terms(first_line: &str, last_line: &str) -> String {
    let mut lines = vec![first_line.to_string()];
    lines.extend((2..10).map(|n| format!("Clause {n}.")));
    lines.push(last_line.to_string());
    lines.join("\n") + "\n"
}

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let fx = Self { dir };
        fx.build();
        fx
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn home(&self) -> PathBuf {
        self.root().join("home")
    }

    pub fn clone_path(&self) -> PathBuf {
        self.root().join("clone")
    }

    pub fn seed(&self) -> PathBuf {
        self.root().join("seed")
    }

    pub fn upstream(&self) -> PathBuf {
        self.root().join("upstream.git")
    }

    pub fn origin(&self) -> PathBuf {
        self.root().join("origin.git")
    }

    pub fn fork(&self, namespace: &str) -> PathBuf {
        self.root().join("forks").join(namespace).join("website.git")
    }

    fn build(&self) {
        let root = self.root();
        for bare in [self.upstream(), self.origin(), self.fork("forkA")] {
            std::fs::create_dir_all(&bare).expect("mkdir bare");
            git(&bare, &["init", "--bare", "--quiet"]);
        }

        let seed = self.seed();
        std::fs::create_dir_all(&seed).expect("mkdir seed");
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        git(&seed, &["config", "user.name", "Seed Author"]);
        git(&seed, &["config", "user.email", "seed@example.org"]);
        git(&seed, &["config", "commit.gpgsign", "false"]);

        // v1 on master
        self.write_seed("wiki/Home.md", "# Home\n");
        self.write_seed("wiki/Legal/Terms.md", &terms("Terms v1.", "Last clause."));
        self.write_seed("assets/site.css", "body {}\n");
        self.commit_seed("initial content");

        // feature-x: edit the last clause, add a news post, plus changes the diff ignores
        git(&seed, &["checkout", "--quiet", "-b", "feature-x"]);
        self.write_seed("wiki/Legal/Terms.md", &terms("Terms v1.", "Last clause, clarified."));
        self.write_seed("news/2024/example.md", "# Example news\n");
        self.write_seed("assets/site.css", "body { margin: 0 }\n");
        git(&seed, &["rm", "--quiet", "wiki/Home.md"]);
        self.commit_seed("clarify terms, announce it");
        self.push_seed(&self.fork("forkA"), "feature-x");

        // conflict: edits the same first line upstream will edit
        git(&seed, &["checkout", "--quiet", "master"]);
        git(&seed, &["checkout", "--quiet", "-b", "conflict"]);
        self.write_seed("wiki/Legal/Terms.md", &terms("Terms, fork edition.", "Last clause."));
        self.commit_seed("fork rewords title");
        self.push_seed(&self.fork("forkA"), "conflict");

        // v2 on master
        git(&seed, &["checkout", "--quiet", "master"]);
        self.write_seed("wiki/Legal/Terms.md", &terms("Terms v2.", "Last clause."));
        self.commit_seed("upstream rewords title");
        self.push_seed(&self.upstream(), "master");
        self.push_seed(&self.origin(), "master");
        self.push_seed(&self.fork("forkA"), "master");

        let clone = self.clone_path();
        std::fs::create_dir_all(&clone).expect("mkdir clone");
        git(&clone, &["init", "--quiet"]);
        git(&clone, &["config", "commit.gpgsign", "false"]);
        git(&clone, &["remote", "add", "upstream", &path_str(&self.upstream())]);
        git(&clone, &["remote", "add", "origin", &path_str(&self.origin())]);
        git(&clone, &["fetch", "--quiet", "upstream"]);
        git(&clone, &["checkout", "--quiet", "-B", "master", "upstream/master"]);

        std::fs::create_dir_all(root.join("home")).expect("mkdir home");
    }

    pub fn write_seed(&self, rel: &str, content: &str) {
        let path = self.seed().join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
    }

    pub fn commit_seed(&self, message: &str) -> String {
        git(&self.seed(), &["add", "--all"]);
        git(&self.seed(), &["commit", "--quiet", "-m", message]);
        git(&self.seed(), &["rev-parse", "HEAD"])
    }

    pub fn push_seed(&self, bare: &Path, branch: &str) {
        let refspec = format!("HEAD:refs/heads/{branch}");
        git(&self.seed(), &["push", "--quiet", "--force", &path_str(bare), &refspec]);
    }

    /// Tip of `branch` in a bare repository, `None` if it does not exist.
    pub fn tip(bare: &Path, branch: &str) -> Option<String> {
        let out = Command::new("git")
            .arg("--git-dir")
            .arg(bare)
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("refs/heads/{branch}"))
            .output()
            .expect("spawn git");
        out.status
            .success()
            .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    pub fn upstream_master(&self) -> String {
        Self::tip(&self.upstream(), "master").expect("upstream master")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            repository_path: self.clone_path(),
            repository: "website".to_string(),
            remote_url_template: format!("{}/forks/{{namespace}}/{{repository}}.git", path_str(self.root())),
            ..Settings::default()
        }
    }

    pub fn switcher(&self, hook: Arc<dyn SiteHook>) -> Switcher {
        Switcher::from_settings(&self.settings(), hook).expect("open clone")
    }

    /// Service over instances 1 and 2 with a one-hour lease.
    pub fn service(&self, hook: Arc<dyn SiteHook>) -> PreviewService<YamlStateStore> {
        self.service_with(&self.settings(), hook)
    }

    /// Service over `settings`, with instances 1 and 2 defined.
    pub fn service_with(
        &self,
        settings: &Settings,
        hook: Arc<dyn SiteHook>,
    ) -> PreviewService<YamlStateStore> {
        for id in [1, 2] {
            add_instance_at(&self.home(), &instance(id)).expect("add instance");
        }
        PreviewService::new(
            Switcher::from_settings(settings, hook).expect("open clone"),
            YamlStateStore::at(self.home()),
            chrono::Duration::hours(1),
        )
    }
}

pub fn instance(id: u32) -> Instance {
    Instance {
        id: InstanceId(id),
        control_channel: format!("C{id}"),
        port: 8000 + id as u16,
    }
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Site hook that records calls and can be told to fail.
#[derive(Default)]
pub struct RecordingHook {
    pub wiki: Mutex<Vec<(InstanceId, CommitId, CommitId)>>,
    pub news: Mutex<Vec<InstanceId>>,
    pub fail_wiki: AtomicBool,
    pub fail_news: AtomicBool,
}

impl RecordingHook {
    pub fn failing_wiki() -> Self {
        let hook = Self::default();
        hook.fail_wiki.store(true, Ordering::SeqCst);
        hook
    }

    pub fn wiki_calls(&self) -> usize {
        self.wiki.lock().unwrap().len()
    }

    pub fn news_calls(&self) -> usize {
        self.news.lock().unwrap().len()
    }
}

impl SiteHook for RecordingHook {
    fn notify_wiki_update(
        &self,
        instance: &Instance,
        from: &CommitId,
        to: &CommitId,
    ) -> Result<(), NotifyError> {
        self.wiki
            .lock()
            .unwrap()
            .push((instance.id, from.clone(), to.clone()));
        if self.fail_wiki.load(Ordering::SeqCst) {
            return Err(NotifyError::new("site unreachable"));
        }
        Ok(())
    }

    fn notify_news_update(&self, instance: &Instance) -> Result<(), NotifyError> {
        self.news.lock().unwrap().push(instance.id);
        if self.fail_news.load(Ordering::SeqCst) {
            return Err(NotifyError::new("news rebuild failed"));
        }
        Ok(())
    }
}
