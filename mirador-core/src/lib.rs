//! Mirador core library: domain types, settings, preview state persistence.
//!
//! - [`types`]: newtypes and domain structs (instances, preview state, diffs)
//! - [`error`]: [`StoreError`]
//! - [`config`]: [`Settings`] load / save
//! - [`store`]: instance definitions and the [`PreviewStateStore`] boundary

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::Settings;
pub use error::StoreError;
pub use store::{PreviewStateStore, YamlStateStore};
pub use types::{
    ChangeType, CommitId, DiffEntry, Instance, InstanceId, PreviewState, PullRequestRef, Remote,
    SwitchResult, CONTENT_EXTENSION, NEWS_PREFIX,
};
