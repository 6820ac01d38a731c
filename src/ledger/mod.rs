//! Ledger collaborators - signing, broadcast and confirmation
//!
//! The orchestrator never talks to a network directly. It goes through the
//! [`TransactionSigner`] and [`LedgerClient`] traits so that a real node
//! client, the in-process [`SimulatedLedger`], or a test double can be
//! plugged in.

pub mod simulated;
pub mod transaction;

use crate::core::handle::{Address, ContractRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use simulated::SimulatedLedger;
pub use transaction::{
    AppArg, ApplicationParams, AssetParams, FeePolicy, GroupError, Operation, OperationKind,
    Signer, TransactionGroup, TransactionRequest,
};

/// Ledger transaction identifier
pub type TxId = String;

/// Failures reported by a ledger collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Timeout, connection reset and similar; the request may be retried
    #[error("network error: {0}")]
    Transient(String),

    /// The ledger evaluated the request and refused it
    #[error("rejected: {0}")]
    Rejected(String),
}

/// A signed group ready for broadcast
///
/// Transaction ids are fixed at signing time, so re-submitting the same
/// value can never create a second copy on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedGroup {
    group: TransactionGroup,
    tx_ids: Vec<TxId>,
}

impl SignedGroup {
    pub fn new(group: TransactionGroup, tx_ids: Vec<TxId>) -> Self {
        Self { group, tx_ids }
    }

    pub fn group(&self) -> &TransactionGroup {
        &self.group
    }

    pub fn tx_ids(&self) -> &[TxId] {
        &self.tx_ids
    }

    /// Id used to track the whole group
    pub fn lead_tx_id(&self) -> &str {
        self.tx_ids.first().map(String::as_str).unwrap_or_default()
    }
}

/// Proof that a group was committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_ids: Vec<TxId>,
    pub round: u64,
    pub created_asset: Option<u64>,
    pub created_application: Option<u64>,
}

/// What the ledger knows about a transaction id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Unknown,
    Pending,
    Confirmed(Confirmation),
    Rejected(String),
}

/// Turns groups into submittable payloads
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, group: &TransactionGroup) -> Result<SignedGroup, LedgerError>;
}

/// Network access to the ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Broadcast a signed group
    async fn submit(&self, signed: &SignedGroup) -> Result<(), LedgerError>;

    /// Look up a previously broadcast transaction
    async fn status(&self, tx_id: &str) -> Result<TxStatus, LedgerError>;

    /// Wait up to `rounds` ledger rounds; `None` when still unconfirmed
    async fn wait_for_confirmation(
        &self,
        tx_id: &str,
        rounds: u64,
    ) -> Result<Option<Confirmation>, LedgerError>;

    /// Compile a logic program into a contract account
    async fn compile_logic(
        &self,
        program: &str,
        template_params: &BTreeMap<String, String>,
    ) -> Result<ContractRef, LedgerError>;

    /// Address of the account an application controls
    fn application_address(&self, app_id: u64) -> Address;
}
