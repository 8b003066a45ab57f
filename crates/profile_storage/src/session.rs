#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use profile_kernel_contracts::identity::Identity;

use crate::listeners::{ListenerId, ListenerRegistry};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityChange {
    Unchanged,
    LoggedIn,
    LoggedOut,
    AddressChanged,
}

impl IdentityChange {
    pub fn between(prev: &Identity, next: &Identity) -> Self {
        if prev == next {
            return Self::Unchanged;
        }
        match (prev.logged_in, next.logged_in) {
            (_, false) => Self::LoggedOut,
            (false, true) => Self::LoggedIn,
            (true, true) => Self::AddressChanged,
        }
    }

    pub fn is_change(self) -> bool {
        self != Self::Unchanged
    }
}

/// Current authenticated identity. Written only by the identity pump and logout.
pub struct SessionStore {
    identity: Mutex<Identity>,
    listeners: ListenerRegistry<Identity>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            identity: Mutex::new(Identity::anonymous()),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn current(&self) -> Identity {
        lock(&self.identity).clone()
    }

    pub fn subscribe(&self, listener: impl Fn(&Identity) + Send + Sync + 'static) -> ListenerId {
        self.listeners.subscribe(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn set_identity(&self, identity: Identity) -> IdentityChange {
        let next = identity.normalized();
        let change = {
            let mut current = lock(&self.identity);
            let change = IdentityChange::between(&current, &next);
            if change.is_change() {
                *current = next.clone();
            }
            change
        };
        if change.is_change() {
            tracing::info!(
                change = ?change,
                address = next.address.as_ref().map(|a| a.as_str()),
                "session identity updated"
            );
            self.listeners.notify(&next);
        }
        change
    }

    /// Terminates the local session; listeners see an anonymous identity.
    pub fn log_out(&self) -> IdentityChange {
        self.set_identity(Identity::anonymous())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
