//! # mirador-sync
//!
//! Branch switching and diff engine for preview instances.
//!
//! A [`Switcher`] owns the one shared working clone and runs the ordered
//! refresh → fetch → reset → merge → publish → notify → diff sequence for a
//! single instance. [`PreviewService`] wraps it with the per-instance lock
//! table and the preview state store; it is what the daemon calls.

pub mod diff;
pub mod error;
pub mod git;
pub mod locks;
pub mod notify;
pub mod remotes;
pub mod repo;
pub mod service;
pub mod switch;

pub use error::{ServiceError, SwitchError};
pub use git::{Identity, Transport};
pub use locks::{InstanceGuard, InstanceLockTable};
pub use notify::{HttpSiteHook, NotifyError, SiteHook};
pub use remotes::RemoteRegistry;
pub use repo::RepositoryHandle;
pub use service::{InstanceStatus, PreviewService, SwitchReport};
pub use switch::{NewsPost, NotifyStatus, SwitchOptions, SwitchOutcome, SwitchRequest, Switcher};
