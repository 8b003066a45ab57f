#![forbid(unsafe_code)]

pub mod listeners;
pub mod profile;
pub mod session;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use listeners::ListenerId;
pub use profile::{ProfileSnapshot, ProfileStore};
pub use session::{IdentityChange, SessionStore};

/// Clears `profile` whenever the session identity changes (logout, login, or a
/// different address). Returns the session listener so callers can unbind.
pub fn bind_profile_to_session(session: &SessionStore, profile: Arc<ProfileStore>) -> ListenerId {
    session.subscribe(move |identity| {
        tracing::debug!(
            logged_in = identity.logged_in,
            "session identity changed; clearing profile"
        );
        profile.clear();
    })
}

// Stores hold plain data, so a poisoned guard is still consistent.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
