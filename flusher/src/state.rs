//! Tenant registries mapping fingerprints to series.

use crate::chunk::Fingerprint;
use crate::series::{Labels, MemorySeries};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The series population of one tenant.
///
/// Each series sits behind its own mutex, which doubles as the
/// per-fingerprint lock shared by the write path and the flush engine.
///
/// Lock ordering: a series guard may only be acquired via the snapshots
/// returned by [`UserState::get`] / [`UserState::series`], never while
/// holding the map lock. The map write lock MAY be taken while holding a
/// series guard (series removal does); the reverse nesting never occurs.
#[derive(Debug, Default)]
pub struct UserState {
    fp_to_series: RwLock<HashMap<Fingerprint, Arc<Mutex<MemorySeries>>>>,
}

impl UserState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The series for `fp`, if present.
    pub fn get(&self, fp: Fingerprint) -> Option<Arc<Mutex<MemorySeries>>> {
        self.fp_to_series.read().get(&fp).map(Arc::clone)
    }

    /// Registers a series for `fp`, returning the shared handle. If a series
    /// already exists for `fp` the existing one is returned untouched.
    ///
    /// Called by the write path when a new series appears.
    pub fn insert(&self, fp: Fingerprint, series: MemorySeries) -> Arc<Mutex<MemorySeries>> {
        Arc::clone(
            self.fp_to_series
                .write()
                .entry(fp)
                .or_insert_with(|| Arc::new(Mutex::new(series))),
        )
    }

    /// A snapshot of all series, safe to iterate without the map lock.
    pub fn series(&self) -> Vec<(Fingerprint, Arc<Mutex<MemorySeries>>)> {
        self.fp_to_series
            .read()
            .iter()
            .map(|(fp, series)| (*fp, Arc::clone(series)))
            .collect()
    }

    /// Drops the series for `fp`.
    pub fn remove_series(&self, fp: Fingerprint, labels: &Labels) {
        if self.fp_to_series.write().remove(&fp).is_some() {
            debug!(%fp, series = %labels, "removed series");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fp_to_series.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.fp_to_series.read().len()
    }
}

/// Registry of every tenant's [`UserState`].
#[derive(Debug, Default)]
pub struct UserStates {
    states: RwLock<HashMap<Arc<str>, Arc<UserState>>>,
}

impl UserStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state for `user_id`, if present.
    pub fn get(&self, user_id: &str) -> Option<Arc<UserState>> {
        self.states.read().get(user_id).map(Arc::clone)
    }

    /// The state for `user_id`, created on first use.
    ///
    /// Called by the write path when a tenant's first sample arrives.
    pub fn get_or_create(&self, user_id: &str) -> Arc<UserState> {
        if let Some(state) = self.get(user_id) {
            return state;
        }
        Arc::clone(
            self.states
                .write()
                .entry(Arc::from(user_id))
                .or_default(),
        )
    }

    /// A snapshot of all tenants, safe to iterate without the registry lock.
    /// Series handles stay valid after removal from the maps.
    pub fn cp(&self) -> Vec<(Arc<str>, Arc<UserState>)> {
        self.states
            .read()
            .iter()
            .map(|(user_id, state)| (Arc::clone(user_id), Arc::clone(state)))
            .collect()
    }

    /// Drops `user_id` if it holds no series.
    pub fn remove_if_empty(&self, user_id: &str) {
        let mut states = self.states.write();
        if states.get(user_id).is_some_and(|state| state.is_empty()) {
            states.remove(user_id);
            debug!(user_id, "removed user with no series");
        }
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}
