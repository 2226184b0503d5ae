//! Namespace → git remote registry.
//!
//! A remote is named after the namespace (fork owner) it points to. The
//! registry remembers every remote it has handed out; the first resolution of
//! a namespace either adopts a remote already configured in the repository or
//! registers a new one from the URL template.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use mirador_core::config::{NAMESPACE_PLACEHOLDER, REPOSITORY_PLACEHOLDER};
use mirador_core::{Remote, Settings};

use crate::error::SwitchError;
use crate::repo::RepositoryHandle;

const MAX_NAMESPACE_LEN: usize = 100;

/// Where remote definitions actually live. Implemented by the shared clone.
pub trait RemoteSource {
    fn remote_url(&self, name: &str) -> Result<Option<String>, SwitchError>;
    fn add_remote(&self, name: &str, url: &str) -> Result<(), SwitchError>;
}

impl RemoteSource for RepositoryHandle {
    fn remote_url(&self, name: &str) -> Result<Option<String>, SwitchError> {
        RepositoryHandle::remote_url(self, name)
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<(), SwitchError> {
        RepositoryHandle::add_remote(self, name, url)
    }
}

#[derive(Debug)]
pub struct RemoteRegistry {
    template: String,
    repository: String,
    remotes: DashMap<String, Remote>,
}

impl RemoteRegistry {
    pub fn new(template: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            repository: repository.into(),
            remotes: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.remote_url_template.clone(),
            settings.repository.clone(),
        )
    }

    /// Return the remote for `namespace`, registering it in `source` on first use.
    ///
    /// Concurrent calls for the same namespace register at most one remote:
    /// the vacant map entry stays locked until registration finishes.
    pub fn resolve(
        &self,
        source: &dyn RemoteSource,
        namespace: &str,
    ) -> Result<Remote, SwitchError> {
        validate_namespace(namespace)?;

        if let Some(remote) = self.remotes.get(namespace) {
            return Ok(remote.clone());
        }

        match self.remotes.entry(namespace.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let remote = self.register(source, namespace)?;
                entry.insert(remote.clone());
                Ok(remote)
            }
        }
    }

    fn register(&self, source: &dyn RemoteSource, namespace: &str) -> Result<Remote, SwitchError> {
        if let Some(url) = source.remote_url(namespace)? {
            tracing::debug!(namespace, url = %url, "adopting configured remote");
            return Ok(Remote {
                name: namespace.to_string(),
                url,
            });
        }

        let url = self.url_for(namespace);
        if url.is_empty() || url.chars().any(char::is_whitespace) {
            return Err(SwitchError::InvalidRemote {
                namespace: namespace.to_string(),
                reason: format!("remote URL '{url}' is not usable"),
            });
        }
        source.add_remote(namespace, &url)?;
        tracing::info!(namespace, url = %url, "registered remote");
        Ok(Remote {
            name: namespace.to_string(),
            url,
        })
    }

    pub fn url_for(&self, namespace: &str) -> String {
        self.template
            .replace(NAMESPACE_PLACEHOLDER, namespace)
            .replace(REPOSITORY_PLACEHOLDER, &self.repository)
    }

    /// Snapshot of every remote resolved so far, sorted by name.
    pub fn cached(&self) -> Vec<Remote> {
        let mut remotes: Vec<Remote> = self.remotes.iter().map(|r| r.value().clone()).collect();
        remotes.sort_by(|a, b| a.name.cmp(&b.name));
        remotes
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}

/// Check that `namespace` is usable both as a remote name and as a URL segment.
pub fn validate_namespace(namespace: &str) -> Result<(), SwitchError> {
    let invalid = |reason: &str| SwitchError::InvalidRemote {
        namespace: namespace.to_string(),
        reason: reason.to_string(),
    };

    let first = namespace.chars().next().ok_or_else(|| invalid("empty namespace"))?;
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(invalid("namespace is too long"));
    }
    if !first.is_ascii_alphanumeric() {
        return Err(invalid("namespace must start with a letter or digit"));
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("namespace contains invalid characters"));
    }
    if namespace.contains("..") || namespace.ends_with(".git") || namespace.ends_with(".lock") {
        return Err(invalid("namespace is not a valid remote name"));
    }
    Ok(())
}
