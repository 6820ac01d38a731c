//! Transaction executor - signs, submits and confirms groups with retry

use crate::core::handle::ContractRef;
use crate::ledger::{
    Confirmation, LedgerClient, LedgerError, SignedGroup, TransactionGroup, TransactionSigner,
    TxStatus,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Exponential backoff for transient ledger errors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Next backoff delay, clamped to [`RetryPolicy::max_delay`]
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Classified outcome of a failed group
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Timeouts, resets and unconfirmed groups that outlived the retry budget
    #[error("transient network error after {attempts} attempt(s): {message}")]
    TransientNetworkError { attempts: u32, message: String },

    /// The ledger refused the group; never retried
    #[error("ledger rejected the transaction: {reason}")]
    LedgerRejection { reason: String },
}

impl From<LedgerError> for ExecutionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Transient(message) => ExecutionError::TransientNetworkError {
                attempts: 1,
                message,
            },
            LedgerError::Rejected(reason) => ExecutionError::LedgerRejection { reason },
        }
    }
}

/// Runs transaction groups against the ledger
pub struct TransactionExecutor {
    signer: Arc<dyn TransactionSigner>,
    client: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
    confirm_rounds: u64,
}

impl TransactionExecutor {
    pub fn new(signer: Arc<dyn TransactionSigner>, client: Arc<dyn LedgerClient>) -> Self {
        Self {
            signer,
            client,
            policy: RetryPolicy::default(),
            confirm_rounds: 4,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_confirm_rounds(mut self, rounds: u64) -> Self {
        self.confirm_rounds = rounds;
        self
    }

    pub fn client(&self) -> &Arc<dyn LedgerClient> {
        &self.client
    }

    /// [`execute`](Self::execute) with the configured confirmation window
    pub async fn submit(&self, group: &TransactionGroup) -> Result<Confirmation, ExecutionError> {
        self.execute(group, self.confirm_rounds).await
    }

    /// Sign once, then submit and wait for confirmation, retrying transient errors
    ///
    /// Before every resubmission the ledger is asked whether it already knows
    /// the group, so a response lost after commit never produces a second
    /// copy.
    pub async fn execute(
        &self,
        group: &TransactionGroup,
        confirm_rounds: u64,
    ) -> Result<Confirmation, ExecutionError> {
        let signed = self.with_retry("sign", move |_| self.signer.sign(group)).await?;
        let tx_id = signed.lead_tx_id().to_string();
        debug!(tx_id = %tx_id, kinds = ?group.kinds(), "signed group");

        let (signed, tx_ref) = (&signed, tx_id.as_str());
        let confirmation = self
            .with_retry("submit", move |attempt| {
                self.attempt(signed, tx_ref, confirm_rounds, attempt > 1)
            })
            .await?;
        info!(tx_id = %tx_id, round = confirmation.round, "group confirmed");
        Ok(confirmation)
    }

    /// Compile a logic program under the same retry budget as submissions
    pub async fn compile_logic(
        &self,
        program: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ContractRef, ExecutionError> {
        self.with_retry("compile", move |_| self.client.compile_logic(program, params))
            .await
    }

    /// Run `call` until it succeeds, is rejected, or the attempt budget runs out
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut delay = self.policy.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(LedgerError::Rejected(reason)) => {
                    warn!(operation, attempt, reason = %reason, "ledger rejected");
                    return Err(ExecutionError::LedgerRejection { reason });
                }
                Err(LedgerError::Transient(message)) => {
                    if attempt >= self.policy.max_attempts {
                        error!(operation, attempt, error = %message, "retry budget exhausted");
                        return Err(ExecutionError::TransientNetworkError {
                            attempts: attempt,
                            message,
                        });
                    }
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient ledger error, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, &self.policy);
                }
            }
        }
    }

    async fn attempt(
        &self,
        signed: &SignedGroup,
        tx_id: &str,
        confirm_rounds: u64,
        resubmission: bool,
    ) -> Result<Confirmation, LedgerError> {
        if resubmission {
            match self.client.status(tx_id).await? {
                TxStatus::Confirmed(confirmation) => {
                    debug!(tx_id = %tx_id, "group already committed by an earlier attempt");
                    return Ok(confirmation);
                }
                TxStatus::Pending => return self.await_confirmation(tx_id, confirm_rounds).await,
                TxStatus::Rejected(reason) => return Err(LedgerError::Rejected(reason)),
                TxStatus::Unknown => {}
            }
        }

        self.client.submit(signed).await?;
        self.await_confirmation(tx_id, confirm_rounds).await
    }

    async fn await_confirmation(
        &self,
        tx_id: &str,
        confirm_rounds: u64,
    ) -> Result<Confirmation, LedgerError> {
        self.client
            .wait_for_confirmation(tx_id, confirm_rounds)
            .await?
            .ok_or_else(|| {
                LedgerError::Transient(format!(
                    "confirmation timeout: {} not confirmed within {} rounds",
                    tx_id, confirm_rounds
                ))
            })
    }
}
