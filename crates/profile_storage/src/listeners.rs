#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Subscription table shared by the stores.
///
/// Listeners are invoked in subscription order, after the registry lock is
/// released, so a listener may subscribe, unsubscribe, or write other stores.
pub struct ListenerRegistry<T> {
    inner: Mutex<RegistryState<T>>,
}

struct RegistryState<T> {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Listener<T>>,
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                next_id: 1,
                listeners: BTreeMap::new(),
            }),
        }
    }

    pub fn subscribe(&self, listener: Listener<T>) -> ListenerId {
        let mut state = lock(&self.inner);
        let id = ListenerId(state.next_id);
        state.next_id = state.next_id.saturating_add(1);
        state.listeners.insert(id, listener);
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        lock(&self.inner).listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = lock(&self.inner).listeners.values().cloned().collect();
        for listener in listeners {
            listener(value);
        }
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
