//! Deployment configuration from YAML

use crate::core::handle::Address;
use crate::execution::executor::RetryPolicy;
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One micro-unit multiplier of the native currency
pub const MICRO: u64 = 1_000_000;

/// Top-level deployment configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub network: NetworkConfig,
    pub retry: RetryConfig,
    pub accounts: AccountsConfig,
    pub funding: FundingConfig,
    pub dao: DaoConfig,
    pub token: TokenConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network name; also names the default checkpoint database
    pub name: String,

    /// Rounds to wait for a group to confirm
    pub confirm_rounds: u64,

    /// Balance the funding account starts with on a fresh local ledger
    pub genesis_balance: u64,

    /// Where the local ledger keeps its state between runs
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

/// A named account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Kebab-case label used in logs and handle names
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Source of funds for every `fund-*` step
    pub funding: AccountConfig,
    pub creator: AccountConfig,
    pub proposer: AccountConfig,
    pub voter_a: AccountConfig,
    pub voter_b: AccountConfig,
}

/// Payment amounts, in micro-units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingConfig {
    pub creator: u64,
    /// Paid to proposer and each voter
    pub participant: u64,
    pub app: u64,
    /// Paid to each contract-held signing account
    pub lsig: u64,
}

/// Parameters passed to the DAO application at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaoConfig {
    pub deposit: u64,
    pub min_support: u64,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    pub url: String,
    pub approval_program: String,
    pub clear_program: String,
    pub dao_fund_lsig_program: String,
    pub proposal_lsig_program: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub asset_name: String,
    pub unit_name: String,
    pub total: u64,
    pub decimals: u32,
    /// Amount of governance token sent to proposer and each voter
    pub distribution_amount: u64,
}

fn account(name: &str, address: &str) -> AccountConfig {
    AccountConfig {
        name: name.to_string(),
        address: Address::new(address),
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            confirm_rounds: 4,
            genesis_balance: 1_000 * MICRO,
            state_file: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            funding: account("master", "MASTERACCOUNT"),
            creator: account("creator", "CREATORACCOUNT"),
            proposer: account("proposer", "PROPOSERACCOUNT"),
            voter_a: account("voter-a", "VOTERAACCOUNT"),
            voter_b: account("voter-b", "VOTERBACCOUNT"),
        }
    }
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            creator: 50 * MICRO,
            participant: 10 * MICRO,
            app: 15 * MICRO,
            lsig: 5 * MICRO,
        }
    }
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            deposit: 15,
            min_support: 5,
            min_duration_secs: 60,
            max_duration_secs: 300,
            url: "www.my-url.com".to_string(),
            approval_program: "dao-app-approval.py".to_string(),
            clear_program: "dao-app-clear.py".to_string(),
            dao_fund_lsig_program: "dao-fund-lsig.py".to_string(),
            proposal_lsig_program: "proposal-lsig.py".to_string(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            asset_name: "gov-token".to_string(),
            unit_name: "GOV".to_string(),
            total: 100_000,
            decimals: 0,
            distribution_amount: 100,
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            retry: RetryConfig::default(),
            accounts: AccountsConfig::default(),
            funding: FundingConfig::default(),
            dao: DaoConfig::default(),
            token: TokenConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

impl AccountsConfig {
    /// Funded participants, in funding order
    pub fn participants(&self) -> [&AccountConfig; 4] {
        [&self.creator, &self.proposer, &self.voter_a, &self.voter_b]
    }

    fn all(&self) -> [&AccountConfig; 5] {
        [
            &self.funding,
            &self.creator,
            &self.proposer,
            &self.voter_a,
            &self.voter_b,
        ]
    }
}

impl DeploymentConfig {
    /// Load deployment configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse deployment configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DeploymentConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the deployment configuration
    pub fn validate(&self) -> Result<()> {
        let kebab = Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$")?;

        let mut seen_names = HashSet::new();
        let mut seen_addresses = HashSet::new();
        for account in self.accounts.all() {
            if !kebab.is_match(&account.name) {
                anyhow::bail!("Account name '{}' must be kebab-case", account.name);
            }
            if !seen_names.insert(&account.name) {
                anyhow::bail!("Duplicate account name: {}", account.name);
            }
            if account.address.as_str().is_empty() {
                anyhow::bail!("Account '{}' has an empty address", account.name);
            }
            if !seen_addresses.insert(&account.address) {
                anyhow::bail!(
                    "Account '{}' reuses address {}",
                    account.name,
                    account.address
                );
            }
        }

        if self.dao.min_duration_secs > self.dao.max_duration_secs {
            anyhow::bail!(
                "dao.min_duration_secs ({}) exceeds dao.max_duration_secs ({})",
                self.dao.min_duration_secs,
                self.dao.max_duration_secs
            );
        }

        if self.retry.max_attempts < 1 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            anyhow::bail!("retry.multiplier must be at least 1.0");
        }
        if self.network.confirm_rounds < 1 {
            anyhow::bail!("network.confirm_rounds must be at least 1");
        }

        let distributed = self.token.distribution_amount.saturating_mul(3);
        if distributed > self.token.total {
            anyhow::bail!(
                "token.total ({}) cannot cover distributing {} to three participants",
                self.token.total,
                self.token.distribution_amount
            );
        }

        Ok(())
    }
}
