#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::ensure_max_chars;
use crate::identity::AccountAddress;
use crate::{ContractViolation, Validate};

/// Upper bound on each user-editable profile field, counted in chars.
pub const PROFILE_FIELD_MAX_CHARS: usize = 256;

/// Point-in-time read of the on-chain profile resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub address: AccountAddress,
    pub name: String,
    pub color: String,
    pub info: String,
}

impl ProfileRecord {
    pub fn v1(address: AccountAddress, name: String, color: String, info: String) -> Self {
        Self {
            address,
            name,
            color,
            info,
        }
    }

    /// Decodes a plain-JSON query result. `null` means no profile exists yet.
    pub fn from_query_value(value: serde_json::Value) -> Result<Option<Self>, ContractViolation> {
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|_| ContractViolation::InvalidValue {
                field: "profile_record",
                reason: "query result must be null or an object with address, name, color, info",
            })
    }
}

/// User-edited field values that have not been submitted yet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub name: String,
    pub color: String,
    pub info: String,
}

impl ProfileDraft {
    pub fn v1(name: impl Into<String>, color: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            info: info.into(),
        }
    }

    pub fn from_record(record: &ProfileRecord) -> Self {
        Self {
            name: record.name.clone(),
            color: record.color.clone(),
            info: record.info.clone(),
        }
    }
}

impl Validate for ProfileDraft {
    fn validate(&self) -> Result<(), ContractViolation> {
        ensure_max_chars("profile_draft.name", &self.name, PROFILE_FIELD_MAX_CHARS)?;
        ensure_max_chars("profile_draft.color", &self.color, PROFILE_FIELD_MAX_CHARS)?;
        ensure_max_chars("profile_draft.info", &self.info, PROFILE_FIELD_MAX_CHARS)?;
        Ok(())
    }
}
