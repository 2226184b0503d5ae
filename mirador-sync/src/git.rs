//! Thin wrapper around the `git` executable.
//!
//! Every command runs with `-C <repo>`, a fixed `C` locale (stderr is matched
//! on in a few places) and terminal prompts disabled, so a missing credential
//! fails fast instead of hanging a worker.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::{io_err, SwitchError};

/// Authentication for outbound fetch/push, configured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transport {
    ssh_key: Option<PathBuf>,
}

impl Transport {
    /// Use whatever the ambient git/ssh configuration provides.
    pub fn ambient() -> Self {
        Self::default()
    }

    pub fn with_ssh_key(key: impl Into<PathBuf>) -> Self {
        Self {
            ssh_key: Some(key.into()),
        }
    }

    pub fn ssh_key(&self) -> Option<&Path> {
        self.ssh_key.as_deref()
    }

    /// Value for `GIT_SSH_COMMAND`, if a key is configured.
    pub fn ssh_command(&self) -> Option<String> {
        self.ssh_key.as_ref().map(|key| {
            format!(
                "ssh -i '{}' -o IdentitiesOnly=yes -o BatchMode=yes",
                key.display().to_string().replace('\'', "'\\''")
            )
        })
    }

    fn apply(&self, cmd: &mut Command) {
        if let Some(ssh) = self.ssh_command() {
            cmd.env("GIT_SSH_COMMAND", ssh);
        }
    }
}

/// Author/committer used for synthetic merge and news commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// `-c` overrides placed before the subcommand.
    pub(crate) fn config_args(&self) -> [String; 4] {
        [
            "-c".to_string(),
            format!("user.name={}", self.name),
            "-c".to_string(),
            format!("user.email={}", self.email),
        ]
    }
}

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    fn from_output(o: Output) -> Self {
        Self {
            success: o.status.success(),
            stdout: String::from_utf8_lossy(&o.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&o.stderr).trim().to_string(),
        }
    }

    /// Turn a failed invocation into [`SwitchError::Git`].
    pub fn ok_or_git(self, command: &str) -> Result<GitOutput, SwitchError> {
        if self.success {
            Ok(self)
        } else {
            Err(SwitchError::Git {
                command: command.to_string(),
                detail: self.stderr,
            })
        }
    }
}

/// Run git in `repo`. `Err` only when the executable could not be started.
pub fn run_git<S: AsRef<str>>(
    repo: &Path,
    args: &[S],
    transport: Option<&Transport>,
) -> Result<GitOutput, SwitchError> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(repo);
    for a in args {
        cmd.arg(a.as_ref());
    }
    cmd.env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(t) = transport {
        t.apply(&mut cmd);
    }
    tracing::trace!(
        repo = %repo.display(),
        args = %args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(" "),
        "git"
    );
    cmd.output()
        .map(GitOutput::from_output)
        .map_err(|e| io_err(repo, e))
}
