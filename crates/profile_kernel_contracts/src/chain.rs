#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::identity::AccountAddress;
use crate::profile::ProfileDraft;
use crate::{ContractViolation, Validate};

/// Import alias rewritten to the deployed contract address before submission.
pub const PROFILE_CONTRACT_ALIAS: &str = "0xProfile";
pub const PROFILE_MUTATION_COMPUTE_LIMIT: u64 = 50;

const READ_PROFILE_SCRIPT: &str = r#"
import Profile from 0xProfile

pub fun main(address: Address): Profile.ReadOnly? {
  return Profile.read(address)
}
"#;

const CREATE_PROFILE_TRANSACTION: &str = r#"
import Profile from 0xProfile

transaction {
  prepare(account: AuthAccount) {
    if (!Profile.check(account.address)) {
      account.save(<- Profile.new(), to: Profile.privatePath)
      account.link<&Profile.Base{Profile.Public}>(Profile.publicPath, target: Profile.privatePath)
    }
  }
}
"#;

const UPDATE_PROFILE_TRANSACTION: &str = r#"
import Profile from 0xProfile

transaction(name: String, color: String, info: String) {
  prepare(account: AuthAccount) {
    account
      .borrow<&Profile.Base{Profile.Owner}>(from: Profile.privatePath)!
      .setName(name)

    account
      .borrow<&Profile.Base{Profile.Owner}>(from: Profile.privatePath)!
      .setInfo(info)

    account
      .borrow<&Profile.Base{Profile.Owner}>(from: Profile.privatePath)!
      .setColor(color)
  }
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileProgram {
    ReadProfile,
    CreateProfile,
    UpdateProfile,
}

impl ProfileProgram {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadProfile => "read_profile",
            Self::CreateProfile => "create_profile",
            Self::UpdateProfile => "update_profile",
        }
    }

    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::CreateProfile | Self::UpdateProfile)
    }

    pub const fn template(self) -> &'static str {
        match self {
            Self::ReadProfile => READ_PROFILE_SCRIPT,
            Self::CreateProfile => CREATE_PROFILE_TRANSACTION,
            Self::UpdateProfile => UPDATE_PROFILE_TRANSACTION,
        }
    }

    pub fn cadence_for(self, contract: &AccountAddress) -> String {
        self.template()
            .replace(PROFILE_CONTRACT_ALIAS, contract.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainArg {
    Address(AccountAddress),
    String(String),
}

impl ChainArg {
    pub fn to_json_cadence(&self) -> Value {
        match self {
            Self::Address(a) => json!({ "type": "Address", "value": a.as_str() }),
            Self::String(s) => json!({ "type": "String", "value": s }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainQuery {
    pub program: ProfileProgram,
    pub cadence: String,
    pub args: Vec<ChainArg>,
}

impl ChainQuery {
    pub fn read_profile(contract: &AccountAddress, address: &AccountAddress) -> Self {
        Self {
            program: ProfileProgram::ReadProfile,
            cadence: ProfileProgram::ReadProfile.cadence_for(contract),
            args: vec![ChainArg::Address(address.clone())],
        }
    }
}

impl Validate for ChainQuery {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.program.is_mutation() {
            return Err(ContractViolation::InvalidValue {
                field: "chain_query.program",
                reason: "must be a read-only script",
            });
        }
        if self.cadence.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "chain_query.cadence",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Accounts the wallet is asked to sign with. Signing itself happens outside this system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSet {
    pub proposer: AccountAddress,
    pub payer: AccountAddress,
    pub authorizers: Vec<AccountAddress>,
}

impl AuthorizationSet {
    pub fn current_user(address: &AccountAddress) -> Self {
        Self {
            proposer: address.clone(),
            payer: address.clone(),
            authorizers: vec![address.clone()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMutation {
    pub program: ProfileProgram,
    pub cadence: String,
    pub args: Vec<ChainArg>,
    pub authorizations: AuthorizationSet,
    pub compute_limit: u64,
}

impl ChainMutation {
    pub fn create_profile(contract: &AccountAddress, signer: &AccountAddress) -> Self {
        Self {
            program: ProfileProgram::CreateProfile,
            cadence: ProfileProgram::CreateProfile.cadence_for(contract),
            args: Vec::new(),
            authorizations: AuthorizationSet::current_user(signer),
            compute_limit: PROFILE_MUTATION_COMPUTE_LIMIT,
        }
    }

    /// Arguments are passed in the fixed order the transaction declares: name, color, info.
    pub fn update_profile(
        contract: &AccountAddress,
        signer: &AccountAddress,
        draft: &ProfileDraft,
    ) -> Self {
        Self {
            program: ProfileProgram::UpdateProfile,
            cadence: ProfileProgram::UpdateProfile.cadence_for(contract),
            args: vec![
                ChainArg::String(draft.name.clone()),
                ChainArg::String(draft.color.clone()),
                ChainArg::String(draft.info.clone()),
            ],
            authorizations: AuthorizationSet::current_user(signer),
            compute_limit: PROFILE_MUTATION_COMPUTE_LIMIT,
        }
    }

    pub fn signer(&self) -> &AccountAddress {
        &self.authorizations.proposer
    }
}

impl Validate for ChainMutation {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.program.is_mutation() {
            return Err(ContractViolation::InvalidValue {
                field: "chain_mutation.program",
                reason: "must be a transaction",
            });
        }
        if self.authorizations.authorizers.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "chain_mutation.authorizations.authorizers",
                reason: "must not be empty",
            });
        }
        if self.compute_limit == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "chain_mutation.compute_limit",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Flattens a JSON-Cadence value into plain JSON.
///
/// Optionals collapse to their inner value or `null`, composites (structs,
/// resources, events) become objects keyed by field name, and numeric types
/// keep the decimal string form the network sends.
pub fn decode_json_cadence(value: &Value) -> Result<Value, ContractViolation> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ContractViolation::InvalidValue {
            field: "json_cadence.type",
            reason: "must be a string",
        })?;
    let inner = value.get("value").unwrap_or(&Value::Null);
    match kind {
        "Void" => Ok(Value::Null),
        "Optional" => {
            if inner.is_null() {
                Ok(Value::Null)
            } else {
                decode_json_cadence(inner)
            }
        }
        "Bool" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or(ContractViolation::InvalidValue {
                field: "json_cadence.value",
                reason: "Bool must carry a boolean",
            }),
        "String" | "Address" | "Character" | "Int" | "UInt" | "Int8" | "Int16" | "Int32"
        | "Int64" | "Int128" | "Int256" | "UInt8" | "UInt16" | "UInt32" | "UInt64"
        | "UInt128" | "UInt256" | "Word8" | "Word16" | "Word32" | "Word64" | "Fix64"
        | "UFix64" => inner
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or(ContractViolation::InvalidValue {
                field: "json_cadence.value",
                reason: "scalar must carry a string",
            }),
        "Array" => {
            let items = inner.as_array().ok_or(ContractViolation::InvalidValue {
                field: "json_cadence.value",
                reason: "Array must carry a list",
            })?;
            items
                .iter()
                .map(decode_json_cadence)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        "Dictionary" => {
            let entries = inner.as_array().ok_or(ContractViolation::InvalidValue {
                field: "json_cadence.value",
                reason: "Dictionary must carry a list of entries",
            })?;
            let mut out = Map::new();
            for entry in entries {
                let key = decode_json_cadence(entry.get("key").unwrap_or(&Value::Null))?;
                let key = match key {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let val = decode_json_cadence(entry.get("value").unwrap_or(&Value::Null))?;
                out.insert(key, val);
            }
            Ok(Value::Object(out))
        }
        "Struct" | "Resource" | "Event" | "Contract" | "Enum" => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_array)
                .ok_or(ContractViolation::InvalidValue {
                    field: "json_cadence.value.fields",
                    reason: "composite must carry a field list",
                })?;
            let mut out = Map::new();
            for f in fields {
                let name = f.get("name").and_then(Value::as_str).ok_or(
                    ContractViolation::InvalidValue {
                        field: "json_cadence.value.fields.name",
                        reason: "must be a string",
                    },
                )?;
                let val = decode_json_cadence(f.get("value").unwrap_or(&Value::Null))?;
                out.insert(name.to_string(), val);
            }
            Ok(Value::Object(out))
        }
        _ => Err(ContractViolation::InvalidValue {
            field: "json_cadence.type",
            reason: "unsupported type",
        }),
    }
}
