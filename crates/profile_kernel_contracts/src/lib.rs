#![forbid(unsafe_code)]

pub mod chain;
pub mod common;
pub mod identity;
pub mod profile;
pub mod txlife;

pub use common::{ContractViolation, ReasonCodeId, Validate};
