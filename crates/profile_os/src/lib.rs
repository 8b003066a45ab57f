#![forbid(unsafe_code)]

pub mod chain;
pub mod chain_http;
pub mod identity;
pub mod profile_ctl;
pub mod txlife;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
