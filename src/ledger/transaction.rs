//! Transaction requests and atomic groups

use crate::core::handle::{Address, ContractRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Most transactions the ledger accepts in one atomic group
pub const MAX_GROUP_SIZE: usize = 16;

/// Flat fee charged when the request does not set one
pub const MIN_FEE: u64 = 1_000;

/// How the fee for a transaction is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePolicy {
    /// Network suggested fee
    Suggested,
    /// Fixed total fee
    Flat(u64),
}

impl FeePolicy {
    pub fn amount(&self) -> u64 {
        match self {
            FeePolicy::Suggested => MIN_FEE,
            FeePolicy::Flat(fee) => *fee,
        }
    }
}

/// Who authorizes a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signer {
    /// Account signed with its secret key
    Key(Address),
    /// Contract account signed by its logic program
    Logic(ContractRef),
}

impl Signer {
    pub fn address(&self) -> &Address {
        match self {
            Signer::Key(address) => address,
            Signer::Logic(contract) => &contract.address,
        }
    }
}

/// Application call argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppArg {
    Int(u64),
    Str(String),
}

impl fmt::Display for AppArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppArg::Int(value) => write!(f, "int:{}", value),
            AppArg::Str(value) => write!(f, "str:{}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetParams {
    pub name: String,
    pub unit_name: String,
    pub total: u64,
    pub decimals: u32,
    pub default_frozen: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationParams {
    pub approval_program: String,
    pub clear_program: String,
    pub local_ints: u32,
    pub local_bytes: u32,
    pub global_ints: u32,
    pub global_bytes: u32,
    pub args: Vec<AppArg>,
    /// Values substituted into the program templates before compiling
    pub template_params: BTreeMap<String, String>,
}

/// The ledger operation a request performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Payment { receiver: Address, amount: u64 },
    AssetTransfer { asset_id: u64, receiver: Address, amount: u64 },
    AssetOptIn { asset_id: u64 },
    CreateAsset(AssetParams),
    CreateApplication(ApplicationParams),
    CallApplication { app_id: u64, args: Vec<AppArg> },
    FundContract { contract: ContractRef, amount: u64 },
}

/// Operation discriminant, handy for logging and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Payment,
    AssetTransfer,
    AssetOptIn,
    CreateAsset,
    CreateApplication,
    CallApplication,
    FundContract,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Payment { .. } => OperationKind::Payment,
            Operation::AssetTransfer { .. } => OperationKind::AssetTransfer,
            Operation::AssetOptIn { .. } => OperationKind::AssetOptIn,
            Operation::CreateAsset(_) => OperationKind::CreateAsset,
            Operation::CreateApplication(_) => OperationKind::CreateApplication,
            Operation::CallApplication { .. } => OperationKind::CallApplication,
            Operation::FundContract { .. } => OperationKind::FundContract,
        }
    }
}

/// Resources a transaction touches besides its sender
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignRefs {
    pub assets: Vec<u64>,
    pub applications: Vec<u64>,
    pub accounts: Vec<Address>,
}

/// Description of one ledger operation
///
/// Built with the constructor functions and `with_*` combinators; there are
/// no setters once a request exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    operation: Operation,
    sender: Signer,
    foreign: ForeignRefs,
    fee: FeePolicy,
}

impl TransactionRequest {
    pub fn new(sender: Signer, operation: Operation) -> Self {
        Self {
            operation,
            sender,
            foreign: ForeignRefs::default(),
            fee: FeePolicy::Suggested,
        }
    }

    pub fn payment(sender: Signer, receiver: Address, amount: u64) -> Self {
        Self::new(sender, Operation::Payment { receiver, amount })
    }

    pub fn asset_transfer(sender: Signer, asset_id: u64, receiver: Address, amount: u64) -> Self {
        Self::new(
            sender,
            Operation::AssetTransfer {
                asset_id,
                receiver,
                amount,
            },
        )
    }

    pub fn asset_opt_in(sender: Signer, asset_id: u64) -> Self {
        Self::new(sender, Operation::AssetOptIn { asset_id })
    }

    pub fn create_asset(sender: Signer, params: AssetParams) -> Self {
        Self::new(sender, Operation::CreateAsset(params))
    }

    pub fn create_application(sender: Signer, params: ApplicationParams) -> Self {
        Self::new(sender, Operation::CreateApplication(params))
    }

    pub fn call_application(sender: Signer, app_id: u64, args: Vec<AppArg>) -> Self {
        Self::new(sender, Operation::CallApplication { app_id, args })
    }

    pub fn fund_contract(sender: Signer, contract: ContractRef, amount: u64) -> Self {
        Self::new(sender, Operation::FundContract { contract, amount })
    }

    pub fn with_fee(mut self, fee: FeePolicy) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_foreign_assets(mut self, assets: Vec<u64>) -> Self {
        self.foreign.assets = assets;
        self
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    pub fn sender(&self) -> &Signer {
        &self.sender
    }

    pub fn foreign(&self) -> &ForeignRefs {
        &self.foreign
    }

    pub fn fee(&self) -> FeePolicy {
        self.fee
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("transaction group must contain at least one request")]
    Empty,

    #[error("transaction group has {len} requests, the ledger accepts at most {max}")]
    TooLarge { len: usize, max: usize },
}

/// Requests the ledger accepts or rejects as one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionGroup {
    requests: Vec<TransactionRequest>,
}

impl TransactionGroup {
    pub fn new(requests: Vec<TransactionRequest>) -> Result<Self, GroupError> {
        if requests.is_empty() {
            return Err(GroupError::Empty);
        }
        if requests.len() > MAX_GROUP_SIZE {
            return Err(GroupError::TooLarge {
                len: requests.len(),
                max: MAX_GROUP_SIZE,
            });
        }
        Ok(Self { requests })
    }

    pub fn single(request: TransactionRequest) -> Self {
        Self {
            requests: vec![request],
        }
    }

    pub fn requests(&self) -> &[TransactionRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Always false; kept for the `len`/`is_empty` pairing
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        self.requests.iter().map(|r| r.kind()).collect()
    }
}
