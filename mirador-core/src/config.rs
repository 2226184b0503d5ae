//! Daemon and engine settings, persisted at `<home>/.mirador/config.yaml`.
//!
//! Follows the same `_at(home)` pattern as [`crate::store`]: tests always pass
//! an explicit home, the no-arg wrappers derive it from `dirs::home_dir()`.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{mirador_root, write_atomic};

/// Upper bound applied to [`Settings::lease_minutes`] (one year).
pub const MAX_LEASE_MINUTES: i64 = 60 * 24 * 365;

/// Placeholder for the namespace in [`Settings::remote_url_template`].
pub const NAMESPACE_PLACEHOLDER: &str = "{namespace}";
/// Placeholder for the fixed repository name in [`Settings::remote_url_template`].
pub const REPOSITORY_PLACEHOLDER: &str = "{repository}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The single shared working clone of the content repository.
    pub repository_path: PathBuf,
    /// Repository name every fork shares.
    pub repository: String,
    /// URL pattern used to register a namespace's fork as a remote.
    pub remote_url_template: String,
    pub upstream_remote: String,
    pub upstream_branch: String,
    pub origin_remote: String,
    /// Local branch that mirrors upstream master.
    pub mirror_branch: String,
    /// Local branch the requested refs are reset onto.
    pub work_branch: String,
    pub lease_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<PathBuf>,
    pub site_host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_timeout_secs: Option<u64>,
    pub merge_author_name: String,
    pub merge_author_email: String,
    pub merge_message: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::from("website"),
            repository: "website".to_string(),
            remote_url_template: "git@github.com:{namespace}/{repository}.git".to_string(),
            upstream_remote: "upstream".to_string(),
            upstream_branch: "master".to_string(),
            origin_remote: "origin".to_string(),
            mirror_branch: "master".to_string(),
            work_branch: "preview".to_string(),
            lease_minutes: 120,
            ssh_key: None,
            site_host: "127.0.0.1".to_string(),
            notify_timeout_secs: None,
            merge_author_name: "Preview Bot".to_string(),
            merge_author_email: "preview-bot@localhost".to_string(),
            merge_message: "Merge upstream master into preview".to_string(),
        }
    }
}

impl Settings {
    /// Reservation length, clamped to `0..=MAX_LEASE_MINUTES`.
    pub fn lease(&self) -> Duration {
        Duration::minutes(self.lease_minutes.clamp(0, MAX_LEASE_MINUTES))
    }

    /// Expand [`Self::remote_url_template`] for `namespace`. Does not validate.
    pub fn remote_url_for(&self, namespace: &str) -> String {
        self.remote_url_template
            .replace(NAMESPACE_PLACEHOLDER, namespace)
            .replace(REPOSITORY_PLACEHOLDER, &self.repository)
    }
}

/// `<home>/.mirador/config.yaml`: pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    mirador_root(home).join("config.yaml")
}

/// Load settings; a missing file yields [`Settings::default`].
pub fn load_at(home: &Path) -> Result<Settings, StoreError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, StoreError> {
    load_at(&crate::store::home()?)
}

/// Atomically save settings.
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), StoreError> {
    let yaml = serde_yaml::to_string(settings)?;
    write_atomic(&settings_path_at(home), &yaml)
}

/// `save_at` convenience wrapper.
pub fn save(settings: &Settings) -> Result<(), StoreError> {
    save_at(&crate::store::home()?, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("tempdir");
        let settings = load_at(home.path()).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let home = TempDir::new().expect("tempdir");
        let path = settings_path_at(home.path());
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "repository: docs\nlease_minutes: 15\n").expect("write");

        let settings = load_at(home.path()).expect("load");
        assert_eq!(settings.repository, "docs");
        assert_eq!(settings.lease(), Duration::minutes(15));
        assert_eq!(settings.upstream_remote, "upstream");
    }

    #[test]
    fn lease_is_clamped() {
        let huge = Settings {
            lease_minutes: i64::MAX,
            ..Settings::default()
        };
        assert_eq!(huge.lease(), Duration::minutes(MAX_LEASE_MINUTES));
        let _reserved_until = chrono::Utc::now() + huge.lease();

        let negative = Settings {
            lease_minutes: -5,
            ..Settings::default()
        };
        assert_eq!(negative.lease(), Duration::zero());
    }

    #[test]
    fn remote_url_expands_both_placeholders() {
        let settings = Settings {
            remote_url_template: "ssh://git@example.org/{namespace}/{repository}".to_string(),
            ..Settings::default()
        };
        assert_eq!(
            settings.remote_url_for("forkA"),
            "ssh://git@example.org/forkA/website"
        );
    }

    #[test]
    fn save_then_load_roundtrip() {
        let home = TempDir::new().expect("tempdir");
        let settings = Settings {
            ssh_key: Some(PathBuf::from("/keys/deploy")),
            notify_timeout_secs: Some(30),
            ..Settings::default()
        };
        save_at(home.path(), &settings).expect("save");
        assert_eq!(load_at(home.path()).expect("load"), settings);
    }

    #[test]
    fn negative_lease_clamps_to_zero() {
        let settings = Settings {
            lease_minutes: -5,
            ..Settings::default()
        };
        assert_eq!(settings.lease(), Duration::zero());
    }
}
