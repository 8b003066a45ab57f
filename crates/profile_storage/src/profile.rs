#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use profile_kernel_contracts::profile::ProfileRecord;

use crate::listeners::{ListenerId, ListenerRegistry};
use crate::lock;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileSnapshot {
    pub record: Option<ProfileRecord>,
    pub exists: bool,
    /// True once a query has completed for the current identity.
    pub loaded: bool,
}

/// Last profile read for the current identity. Every load is a full replace.
pub struct ProfileStore {
    state: Mutex<ProfileSnapshot>,
    listeners: ListenerRegistry<ProfileSnapshot>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProfileSnapshot::default()),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn current(&self) -> Option<ProfileRecord> {
        lock(&self.state).record.clone()
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        lock(&self.state).clone()
    }

    pub fn exists(&self) -> bool {
        lock(&self.state).exists
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).loaded
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&ProfileSnapshot) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.subscribe(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn set_from_query(&self, result: Option<ProfileRecord>) {
        self.set_from_query_if(result, || true);
    }

    /// Replaces the record only if `still_current` holds while the store is
    /// locked. `still_current` must not write to this store.
    ///
    /// Session listeners clear this store after the identity has changed, so
    /// checking the identity under this lock means a read for a previous
    /// identity is either rejected here or cleared right after.
    pub fn set_from_query_if(
        &self,
        result: Option<ProfileRecord>,
        still_current: impl FnOnce() -> bool,
    ) -> bool {
        let next = ProfileSnapshot {
            exists: result.is_some(),
            record: result,
            loaded: true,
        };
        {
            let mut state = lock(&self.state);
            if !still_current() {
                return false;
            }
            *state = next.clone();
        }
        tracing::debug!(exists = next.exists, "profile replaced from query");
        self.listeners.notify(&next);
        true
    }

    pub fn clear(&self) {
        let changed = {
            let mut state = lock(&self.state);
            let changed = *state != ProfileSnapshot::default();
            *state = ProfileSnapshot::default();
            changed
        };
        if changed {
            self.listeners.notify(&ProfileSnapshot::default());
        }
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}
