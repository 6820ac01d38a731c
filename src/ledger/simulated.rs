//! In-process ledger used for local runs and tests
//!
//! Models balances, assets, applications, opt-ins and contract accounts well
//! enough to produce the rejections a real network would: insufficient
//! balance, unknown references, transfers to accounts that have not opted
//! in. Groups are applied atomically.

use crate::core::handle::{Address, ContractRef};
use crate::ledger::transaction::{AppArg, Operation, TransactionGroup, TransactionRequest};
use crate::ledger::{
    Confirmation, LedgerClient, LedgerError, SignedGroup, TransactionSigner, TxId, TxStatus,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// App call argument that makes the application account opt in to its foreign assets
pub const OPT_IN_ASSET_CALL: &str = "optin_gov_token";

const FIRST_RESOURCE_ID: u64 = 1_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountState {
    balance: u64,
    /// Asset id -> amount; presence means the account has opted in
    holdings: BTreeMap<u64, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AssetState {
    creator: Address,
    name: String,
    total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApplicationState {
    creator: Address,
    approval_program: String,
    args: Vec<AppArg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerState {
    round: u64,
    next_id: u64,
    accounts: BTreeMap<Address, AccountState>,
    assets: BTreeMap<u64, AssetState>,
    applications: BTreeMap<u64, ApplicationState>,
    confirmed: BTreeMap<TxId, Confirmation>,
    rejected: BTreeMap<TxId, String>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            round: 0,
            next_id: FIRST_RESOURCE_ID,
            accounts: BTreeMap::new(),
            assets: BTreeMap::new(),
            applications: BTreeMap::new(),
            confirmed: BTreeMap::new(),
            rejected: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Created {
    asset: Option<u64>,
    application: Option<u64>,
}

impl LedgerState {
    fn apply_group(&mut self, group: &TransactionGroup) -> Result<Created, String> {
        let mut draft = LedgerState {
            confirmed: BTreeMap::new(),
            rejected: BTreeMap::new(),
            ..self.clone()
        };
        let mut created = Created::default();

        for request in group.requests() {
            draft.apply(request, &mut created)?;
        }

        self.next_id = draft.next_id;
        self.accounts = draft.accounts;
        self.assets = draft.assets;
        self.applications = draft.applications;
        Ok(created)
    }

    fn apply(&mut self, request: &TransactionRequest, created: &mut Created) -> Result<(), String> {
        let sender = request.sender().address().clone();
        self.debit(&sender, request.fee().amount())?;

        match request.operation() {
            Operation::Payment { receiver, amount } => {
                self.debit(&sender, *amount)?;
                self.credit(receiver, *amount);
            }
            Operation::FundContract { contract, amount } => {
                self.debit(&sender, *amount)?;
                self.credit(&contract.address, *amount);
            }
            Operation::AssetOptIn { asset_id } => {
                self.require_asset(*asset_id)?;
                self.accounts
                    .entry(sender)
                    .or_default()
                    .holdings
                    .entry(*asset_id)
                    .or_insert(0);
            }
            Operation::AssetTransfer {
                asset_id,
                receiver,
                amount,
            } => {
                self.require_asset(*asset_id)?;
                if !self.is_opted_in(receiver, *asset_id) {
                    return Err(format!(
                        "receiver {} has not opted in to asset {}",
                        receiver, asset_id
                    ));
                }
                let held = self
                    .accounts
                    .get_mut(&sender)
                    .and_then(|a| a.holdings.get_mut(asset_id))
                    .ok_or_else(|| format!("sender {} does not hold asset {}", sender, asset_id))?;
                if *held < *amount {
                    return Err(format!(
                        "insufficient asset balance: {} holds {} of asset {}, needs {}",
                        sender, held, asset_id, amount
                    ));
                }
                *held -= amount;
                if let Some(holding) = self
                    .accounts
                    .get_mut(receiver)
                    .and_then(|a| a.holdings.get_mut(asset_id))
                {
                    *holding += amount;
                }
            }
            Operation::CreateAsset(params) => {
                let id = self.allocate_id();
                self.assets.insert(
                    id,
                    AssetState {
                        creator: sender.clone(),
                        name: params.name.clone(),
                        total: params.total,
                    },
                );
                self.accounts
                    .entry(sender)
                    .or_default()
                    .holdings
                    .insert(id, params.total);
                created.asset = Some(id);
            }
            Operation::CreateApplication(params) => {
                let id = self.allocate_id();
                self.applications.insert(
                    id,
                    ApplicationState {
                        creator: sender,
                        approval_program: params.approval_program.clone(),
                        args: params.args.clone(),
                    },
                );
                created.application = Some(id);
            }
            Operation::CallApplication { app_id, args } => {
                if !self.applications.contains_key(app_id) {
                    return Err(format!("invalid reference: application {} does not exist", app_id));
                }
                let opt_in = matches!(args.first(), Some(AppArg::Str(call)) if call == OPT_IN_ASSET_CALL);
                if opt_in {
                    let assets = &request.foreign().assets;
                    if assets.is_empty() {
                        return Err("logic eval error: opt-in call without a foreign asset".to_string());
                    }
                    let app_account = app_address(*app_id);
                    for asset_id in assets {
                        self.require_asset(*asset_id)?;
                        self.accounts
                            .entry(app_account.clone())
                            .or_default()
                            .holdings
                            .entry(*asset_id)
                            .or_insert(0);
                    }
                }
            }
        }

        Ok(())
    }

    fn debit(&mut self, address: &Address, amount: u64) -> Result<(), String> {
        let account = self
            .accounts
            .get_mut(address)
            .ok_or_else(|| format!("insufficient balance: account {} does not exist", address))?;
        if account.balance < amount {
            return Err(format!(
                "insufficient balance: account {} has {}, needs {}",
                address, account.balance, amount
            ));
        }
        account.balance -= amount;
        Ok(())
    }

    fn credit(&mut self, address: &Address, amount: u64) {
        self.accounts.entry(address.clone()).or_default().balance += amount;
    }

    fn require_asset(&self, asset_id: u64) -> Result<(), String> {
        if self.assets.contains_key(&asset_id) {
            Ok(())
        } else {
            Err(format!("invalid reference: asset {} does not exist", asset_id))
        }
    }

    fn is_opted_in(&self, address: &Address, asset_id: u64) -> bool {
        self.accounts
            .get(address)
            .is_some_and(|a| a.holdings.contains_key(&asset_id))
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn app_address(app_id: u64) -> Address {
    Address::new(format!("APPACCT{:010}", app_id))
}

/// FNV-1a, enough to give compiled programs stable distinct addresses
fn fingerprint(input: &str) -> u64 {
    input.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// In-process ledger
#[derive(Debug, Default)]
pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
    latency: Option<Duration>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account with a native balance
    pub fn with_account(self, address: Address, balance: u64) -> Self {
        self.lock().accounts.entry(address).or_default().balance += balance;
        self
    }

    /// Seed an existing asset held in full by its creator
    pub fn with_asset(self, asset_id: u64, creator: Address, total: u64) -> Self {
        {
            let mut state = self.lock();
            state.assets.insert(
                asset_id,
                AssetState {
                    creator: creator.clone(),
                    name: format!("asset-{}", asset_id),
                    total,
                },
            );
            state
                .accounts
                .entry(creator)
                .or_default()
                .holdings
                .insert(asset_id, total);
            state.next_id = state.next_id.max(asset_id + 1);
        }
        self
    }

    /// Delay every submission, so concurrent steps actually overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Restore a ledger saved with [`SimulatedLedger::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger state from {}", path.display()))?;
        let state: LedgerState =
            serde_json::from_str(&content).context("Failed to parse ledger state")?;
        Ok(Self {
            state: Mutex::new(state),
            latency: None,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.lock())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write ledger state to {}", path.display()))
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.lock().accounts.get(address).map_or(0, |a| a.balance)
    }

    /// Asset amount held by an account; `None` if it never opted in
    pub fn holding(&self, address: &Address, asset_id: u64) -> Option<u64> {
        self.lock()
            .accounts
            .get(address)
            .and_then(|a| a.holdings.get(&asset_id).copied())
    }

    pub fn asset_count(&self) -> usize {
        self.lock().assets.len()
    }

    pub fn application_count(&self) -> usize {
        self.lock().applications.len()
    }

    pub fn round(&self) -> u64 {
        self.lock().round
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransactionSigner for SimulatedLedger {
    async fn sign(&self, group: &TransactionGroup) -> Result<SignedGroup, LedgerError> {
        let tx_ids = group
            .requests()
            .iter()
            .map(|_| Uuid::new_v4().simple().to_string().to_uppercase())
            .collect();
        Ok(SignedGroup::new(group.clone(), tx_ids))
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit(&self, signed: &SignedGroup) -> Result<(), LedgerError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(id) = signed.tx_ids().iter().find(|id| state.confirmed.contains_key(*id)) {
            return Err(LedgerError::Rejected(format!(
                "transaction {} already in ledger",
                id
            )));
        }

        match state.apply_group(signed.group()) {
            Ok(created) => {
                state.round += 1;
                let confirmation = Confirmation {
                    tx_ids: signed.tx_ids().to_vec(),
                    round: state.round,
                    created_asset: created.asset,
                    created_application: created.application,
                };
                debug!(
                    tx_id = %signed.lead_tx_id(),
                    round = state.round,
                    "group committed"
                );
                for id in signed.tx_ids() {
                    state.confirmed.insert(id.clone(), confirmation.clone());
                }
                Ok(())
            }
            Err(reason) => {
                for id in signed.tx_ids() {
                    state.rejected.insert(id.clone(), reason.clone());
                }
                Err(LedgerError::Rejected(reason))
            }
        }
    }

    async fn status(&self, tx_id: &str) -> Result<TxStatus, LedgerError> {
        let state = self.lock();
        if let Some(confirmation) = state.confirmed.get(tx_id) {
            return Ok(TxStatus::Confirmed(confirmation.clone()));
        }
        if let Some(reason) = state.rejected.get(tx_id) {
            return Ok(TxStatus::Rejected(reason.clone()));
        }
        Ok(TxStatus::Unknown)
    }

    async fn wait_for_confirmation(
        &self,
        tx_id: &str,
        _rounds: u64,
    ) -> Result<Option<Confirmation>, LedgerError> {
        Ok(self.lock().confirmed.get(tx_id).cloned())
    }

    async fn compile_logic(
        &self,
        program: &str,
        template_params: &BTreeMap<String, String>,
    ) -> Result<ContractRef, LedgerError> {
        let mut source = program.to_string();
        for (key, value) in template_params {
            source.push_str(&format!(";{}={}", key, value));
        }
        Ok(ContractRef {
            address: Address::new(format!("LSIG{:016X}", fingerprint(&source))),
            program: program.to_string(),
        })
    }

    fn application_address(&self, app_id: u64) -> Address {
        app_address(app_id)
    }
}
