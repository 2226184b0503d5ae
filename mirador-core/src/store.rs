//! Per-instance YAML store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.mirador/
//!   config.yaml              (settings, see crate::config)
//!   instances/
//!     <id>.yaml              (Instance definition: mode 0600)
//!   previews/
//!     <id>.yaml              (last applied PreviewState: mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::types::{Instance, InstanceId, PreviewState};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.mirador/`
pub fn mirador_root(home: &Path) -> PathBuf {
    home.join(".mirador")
}

/// `<home>/.mirador/instances/<id>.yaml`: pure, no I/O.
pub fn instance_path_at(home: &Path, id: InstanceId) -> PathBuf {
    mirador_root(home)
        .join("instances")
        .join(format!("{}.yaml", id.0))
}

/// `<home>/.mirador/previews/<id>.yaml`: pure, no I/O.
pub fn preview_path_at(home: &Path, id: InstanceId) -> PathBuf {
    mirador_root(home)
        .join("previews")
        .join(format!("{}.yaml", id.0))
}

// ---------------------------------------------------------------------------
// 2. Instances
// ---------------------------------------------------------------------------

/// Define a new instance. Fails with `InstanceExists` if the id is taken.
pub fn add_instance_at(home: &Path, instance: &Instance) -> Result<(), StoreError> {
    let path = instance_path_at(home, instance.id);
    if path.exists() {
        return Err(StoreError::InstanceExists { id: instance.id.0 });
    }
    let yaml = serde_yaml::to_string(instance)?;
    write_atomic(&path, &yaml)
}

/// `add_instance_at` convenience wrapper.
pub fn add_instance(instance: &Instance) -> Result<(), StoreError> {
    add_instance_at(&home()?, instance)
}

/// Load one instance definition.
///
/// Returns `StoreError::InstanceNotFound` if absent,
/// `StoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_instance_at(home: &Path, id: InstanceId) -> Result<Instance, StoreError> {
    let path = instance_path_at(home, id);
    if !path.exists() {
        return Err(StoreError::InstanceNotFound { id: id.0, path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// All defined instances, sorted by id. Files that are not `<number>.yaml` are skipped.
pub fn list_instances_at(home: &Path) -> Result<Vec<Instance>, StoreError> {
    let dir = mirador_root(home).join("instances");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut ids: Vec<InstanceId> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".yaml")
                .and_then(|stem| stem.parse::<u32>().ok())
                .map(InstanceId)
        })
        .collect();
    ids.sort();

    ids.into_iter()
        .map(|id| load_instance_at(home, id))
        .collect()
}

/// `list_instances_at` convenience wrapper.
pub fn list_instances() -> Result<Vec<Instance>, StoreError> {
    list_instances_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Preview states
// ---------------------------------------------------------------------------

/// Load the preview state of an instance; `None` if it never showed anything.
pub fn load_preview_at(home: &Path, id: InstanceId) -> Result<Option<PreviewState>, StoreError> {
    let path = preview_path_at(home, id);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|e| StoreError::Parse { path, source: e })
}

/// Atomically replace the preview state of an instance.
pub fn save_preview_at(home: &Path, id: InstanceId, state: &PreviewState) -> Result<(), StoreError> {
    let yaml = serde_yaml::to_string(state)?;
    write_atomic(&preview_path_at(home, id), &yaml)
}

// ---------------------------------------------------------------------------
// 4. Store boundary
// ---------------------------------------------------------------------------

/// Durable record of what each instance shows.
pub trait PreviewStateStore: Send + Sync {
    fn save(&self, id: InstanceId, state: &PreviewState) -> Result<(), StoreError>;
    fn load(&self, id: InstanceId) -> Result<Option<PreviewState>, StoreError>;
    fn instance(&self, id: InstanceId) -> Result<Instance, StoreError>;
    fn instances(&self) -> Result<Vec<Instance>, StoreError>;
}

/// [`PreviewStateStore`] backed by the YAML layout above.
#[derive(Debug, Clone)]
pub struct YamlStateStore {
    home: PathBuf,
}

impl YamlStateStore {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Store rooted at the current user's home directory.
    pub fn from_env() -> Result<Self, StoreError> {
        Ok(Self::at(home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl PreviewStateStore for YamlStateStore {
    fn save(&self, id: InstanceId, state: &PreviewState) -> Result<(), StoreError> {
        save_preview_at(&self.home, id, state)
    }

    fn load(&self, id: InstanceId) -> Result<Option<PreviewState>, StoreError> {
        load_preview_at(&self.home, id)
    }

    fn instance(&self, id: InstanceId) -> Result<Instance, StoreError> {
        load_instance_at(&self.home, id)
    }

    fn instances(&self) -> Result<Vec<Instance>, StoreError> {
        list_instances_at(&self.home)
    }
}

// ---------------------------------------------------------------------------
// Crate helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

/// Write flow: `.tmp` sibling → `chmod 0600` → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem).
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            set_dir_permissions(dir)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp_path, contents)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn instance(id: u32) -> Instance {
        Instance {
            id: InstanceId(id),
            control_channel: format!("C-preview-{id}"),
            port: 8000 + id as u16,
        }
    }

    #[test]
    fn instance_path_is_correct() {
        let home = make_home();
        let path = instance_path_at(home.path(), InstanceId(4));
        assert!(path.ends_with(".mirador/instances/4.yaml"));
    }

    #[test]
    fn instance_dir_created_with_perms() {
        let home = make_home();
        add_instance_at(home.path(), &instance(1)).expect("add");
        let dir = mirador_root(home.path()).join("instances");
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn list_instances_sorted_by_id() {
        let home = make_home();
        for id in [10, 2, 7] {
            add_instance_at(home.path(), &instance(id)).expect("add");
        }
        let ids: Vec<u32> = list_instances_at(home.path())
            .expect("list")
            .into_iter()
            .map(|i| i.id.0)
            .collect();
        assert_eq!(ids, vec![2, 7, 10]);
    }

    #[test]
    fn duplicate_instance_rejected() {
        let home = make_home();
        add_instance_at(home.path(), &instance(1)).expect("add");
        let err = add_instance_at(home.path(), &instance(1)).unwrap_err();
        assert!(matches!(err, StoreError::InstanceExists { id: 1 }));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = make_home();
        let state = PreviewState::fresh("forkA", "main", false, Utc::now(), Duration::hours(1));
        save_preview_at(home.path(), InstanceId(1), &state).expect("save");
        let tmp = preview_path_at(home.path(), InstanceId(1)).with_file_name("1.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn missing_preview_is_none() {
        let home = make_home();
        let store = YamlStateStore::at(home.path());
        assert_eq!(store.load(InstanceId(9)).expect("load"), None);
    }

    #[test]
    fn store_save_replaces_previous_state() {
        let home = make_home();
        let store = YamlStateStore::at(home.path());
        let now = Utc::now();
        let first = PreviewState::fresh("forkA", "one", false, now, Duration::hours(1));
        let second = PreviewState::fresh("forkB", "two", true, now, Duration::hours(1));
        store.save(InstanceId(1), &first).expect("save");
        store.save(InstanceId(1), &second).expect("save");
        assert_eq!(store.load(InstanceId(1)).expect("load"), Some(second));
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(StoreError::HomeNotFound.to_string().contains("home directory"));
    }
}
