//! Instance-level operations: lock the instance, drive the [`Switcher`], and
//! record what the instance now shows.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use mirador_core::{
    DiffEntry, Instance, InstanceId, PreviewState, PreviewStateStore, PullRequestRef,
};

use crate::error::ServiceError;
use crate::locks::{InstanceGuard, InstanceLockTable};
use crate::switch::{NewsPost, SwitchOutcome, SwitchRequest, Switcher};

/// A completed switch and the state recorded for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchReport {
    pub instance: InstanceId,
    pub state: PreviewState,
    pub outcome: SwitchOutcome,
}

/// One row of the fleet overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance: Instance,
    pub state: Option<PreviewState>,
    pub busy: bool,
}

pub struct PreviewService<S: PreviewStateStore> {
    switcher: Switcher,
    locks: InstanceLockTable,
    store: S,
    lease: Duration,
    completed: AtomicU64,
}

impl<S: PreviewStateStore> PreviewService<S> {
    pub fn new(switcher: Switcher, store: S, lease: Duration) -> Self {
        Self {
            switcher,
            locks: InstanceLockTable::new(),
            store,
            lease,
            completed: AtomicU64::new(0),
        }
    }

    pub fn switcher(&self) -> &Switcher {
        &self.switcher
    }

    pub fn locks(&self) -> &InstanceLockTable {
        &self.locks
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of switches (including news previews) recorded since startup.
    pub fn completed_switches(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    fn guard(&self, id: InstanceId) -> Result<InstanceGuard, ServiceError> {
        self.locks.guard(id).ok_or_else(|| {
            tracing::info!(instance = %id, "instance busy");
            ServiceError::Busy(id)
        })
    }

    // -----------------------------------------------------------------------
    // Switching
    // -----------------------------------------------------------------------

    /// Show `request` on instance `id` and claim it for one lease.
    pub fn switch(&self, id: InstanceId, request: &SwitchRequest) -> Result<SwitchReport, ServiceError> {
        let _guard = self.guard(id)?;
        let instance = self.store.instance(id)?;
        let state = PreviewState::fresh(
            request.namespace.clone(),
            request.git_ref.clone(),
            request.merge_master,
            Utc::now(),
            self.lease,
        );
        self.run_switch(&instance, request, state)
    }

    /// Re-apply what instance `id` already shows, picking up new commits.
    pub fn refresh(&self, id: InstanceId) -> Result<SwitchReport, ServiceError> {
        let _guard = self.guard(id)?;
        let instance = self.store.instance(id)?;
        let current = self.store.load(id)?.ok_or(ServiceError::NoPreview(id))?;
        let request = SwitchRequest::new(
            current.namespace.clone(),
            current.git_ref.clone(),
            current.merge_master,
        );
        let state = current.claim(Utc::now(), self.lease);
        self.run_switch(&instance, &request, state)
    }

    /// Show `request` on the lowest-numbered instance that is free for reuse.
    pub fn switch_any(&self, request: &SwitchRequest) -> Result<SwitchReport, ServiceError> {
        let now = Utc::now();
        for instance in self.store.instances()? {
            let Some(_guard) = self.locks.guard(instance.id) else {
                continue;
            };
            let reusable = match self.store.load(instance.id)? {
                None => true,
                Some(state) => state.is_available(now),
            };
            if !reusable {
                continue;
            }
            tracing::info!(instance = %instance.id, "picked free instance");
            let state = PreviewState::fresh(
                request.namespace.clone(),
                request.git_ref.clone(),
                request.merge_master,
                now,
                self.lease,
            );
            return self.run_switch(&instance, request, state);
        }
        Err(ServiceError::NoInstanceAvailable)
    }

    /// Preview a news post on top of upstream master on instance `id`.
    pub fn push_news_preview(&self, id: InstanceId, post: &NewsPost) -> Result<SwitchReport, ServiceError> {
        let _guard = self.guard(id)?;
        let instance = self.store.instance(id)?;
        let options = self.switcher.options();
        let state = PreviewState::fresh(
            options.upstream_remote.clone(),
            options.upstream_branch.clone(),
            false,
            Utc::now(),
            self.lease,
        );
        let outcome = self
            .switcher
            .push_news_preview(&instance, post)?;
        self.record(&instance, state, outcome)
    }

    fn run_switch(
        &self,
        instance: &Instance,
        request: &SwitchRequest,
        state: PreviewState,
    ) -> Result<SwitchReport, ServiceError> {
        let outcome = self
            .switcher
            .switch_branch(instance, request)?;
        self.record(instance, state, outcome)
    }

    /// Persist the state of a published switch, even if the site was not reached.
    fn record(
        &self,
        instance: &Instance,
        state: PreviewState,
        outcome: SwitchOutcome,
    ) -> Result<SwitchReport, ServiceError> {
        self.store.save(instance.id, &state)?;
        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(SwitchReport {
            instance: instance.id,
            state,
            outcome,
        })
    }

    // -----------------------------------------------------------------------
    // State edits
    // -----------------------------------------------------------------------

    /// Change the stored flags; they take effect on the next refresh.
    pub fn set_flags(
        &self,
        id: InstanceId,
        redate_news: Option<bool>,
        merge_master: Option<bool>,
    ) -> Result<PreviewState, ServiceError> {
        self.update_state(id, |mut state| {
            if let Some(redate) = redate_news {
                state = state.with_redate(redate);
            }
            if let Some(master) = merge_master {
                state = state.with_master(master);
            }
            state
        })
    }

    pub fn link_pull_request(
        &self,
        id: InstanceId,
        pull_request: Option<PullRequestRef>,
    ) -> Result<PreviewState, ServiceError> {
        self.update_state(id, |state| state.with_pull_request(pull_request))
    }

    /// Make instance `id` immediately eligible for [`Self::switch_any`].
    pub fn release(&self, id: InstanceId) -> Result<PreviewState, ServiceError> {
        self.update_state(id, |state| state.release(Utc::now()))
    }

    fn update_state(
        &self,
        id: InstanceId,
        apply: impl FnOnce(PreviewState) -> PreviewState,
    ) -> Result<PreviewState, ServiceError> {
        let _guard = self.guard(id)?;
        let current = self.store.load(id)?.ok_or(ServiceError::NoPreview(id))?;
        let updated = apply(current);
        self.store.save(id, &updated)?;
        tracing::debug!(instance = %id, "preview state updated");
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self, id: InstanceId) -> Result<Option<PreviewState>, ServiceError> {
        Ok(self.store.load(id)?)
    }

    pub fn instances(&self) -> Result<Vec<InstanceStatus>, ServiceError> {
        self.store
            .instances()?
            .into_iter()
            .map(|instance| -> Result<InstanceStatus, ServiceError> {
                let state = self.store.load(instance.id)?;
                let busy = self.locks.is_held(instance.id);
                Ok(InstanceStatus {
                    instance,
                    state,
                    busy,
                })
            })
            .collect()
    }

    pub fn diff(&self, from: &str, to: &str) -> Result<Vec<DiffEntry>, ServiceError> {
        Ok(self.switcher.diff(from, to)?)
    }
}
