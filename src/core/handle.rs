//! Resource handles produced by provisioning steps

use serde::{Deserialize, Serialize};
use std::fmt;

/// A ledger account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A compiled logic contract and the account address derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    /// Address of the contract-held account
    pub address: Address,

    /// Source program the contract was compiled from
    pub program: String,
}

/// Identifier of a resource created during provisioning
///
/// Handles are written once by the step that produces them and are
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleValue {
    /// Fungible asset (token) id
    Asset(u64),
    /// Smart-contract application id
    Application(u64),
    /// Plain account
    Account(Address),
    /// Contract-held signing account
    Contract(ContractRef),
}

impl HandleValue {
    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            HandleValue::Asset(_) => "asset",
            HandleValue::Application(_) => "application",
            HandleValue::Account(_) => "account",
            HandleValue::Contract(_) => "contract",
        }
    }

    pub fn as_asset(&self) -> Option<u64> {
        match self {
            HandleValue::Asset(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_application(&self) -> Option<u64> {
        match self {
            HandleValue::Application(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_contract(&self) -> Option<&ContractRef> {
        match self {
            HandleValue::Contract(contract) => Some(contract),
            _ => None,
        }
    }

    /// Address of an account or contract handle
    pub fn address(&self) -> Option<&Address> {
        match self {
            HandleValue::Account(address) => Some(address),
            HandleValue::Contract(contract) => Some(&contract.address),
            _ => None,
        }
    }
}

impl fmt::Display for HandleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleValue::Asset(id) => write!(f, "asset #{}", id),
            HandleValue::Application(id) => write!(f, "app #{}", id),
            HandleValue::Account(address) => write!(f, "account {}", address),
            HandleValue::Contract(contract) => {
                write!(f, "contract {} ({})", contract.address, contract.program)
            }
        }
    }
}
