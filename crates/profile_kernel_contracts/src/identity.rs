#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

/// Hex digits in an account address, excluding the `0x` prefix.
pub const ACCOUNT_ADDRESS_HEX_LEN: usize = 16;

/// Chain account address, canonicalized to `0x` + 16 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ContractViolation> {
        let lowered = raw.as_ref().trim().to_ascii_lowercase();
        let hex = lowered.strip_prefix("0x").unwrap_or(&lowered);
        if hex.len() != ACCOUNT_ADDRESS_HEX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "account_address",
                reason: "must be 16 hex digits (optionally 0x-prefixed)",
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ContractViolation::InvalidValue {
                field: "account_address",
                reason: "must contain only hex digits",
            });
        }
        Ok(Self(format!("0x{hex}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountAddress {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountAddress> for String {
    fn from(value: AccountAddress) -> Self {
        value.0
    }
}

/// Snapshot of the authenticated user as pushed by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Identity {
    pub address: Option<AccountAddress>,
    pub logged_in: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            address: None,
            logged_in: false,
        }
    }

    pub fn logged_in(address: AccountAddress) -> Self {
        Self {
            address: Some(address),
            logged_in: true,
        }
    }

    /// Drops any address carried by an anonymous snapshot.
    pub fn normalized(self) -> Self {
        if self.logged_in {
            self
        } else {
            Self::anonymous()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        !self.logged_in
    }

    /// Address usable for keyed reads; `None` unless logged in.
    pub fn active_address(&self) -> Option<&AccountAddress> {
        if self.logged_in {
            self.address.as_ref()
        } else {
            None
        }
    }
}

impl Validate for Identity {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.logged_in && self.address.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "identity.address",
                reason: "must be None when logged_in=false",
            });
        }
        Ok(())
    }
}
