// src/submitter.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Eip1559TransactionRequest, H256, U256, U64,
};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info};

use crate::chain::ChainAccessor;
use crate::contracts::HandleOpsCall;
use crate::error::{summarize, BundlerError};
use crate::pool::Account;
use crate::types::UserOperation;

/// Sends one attempt of a user operation batch to the entry point.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Submitter: Send + Sync + 'static {
    async fn send(
        &self,
        ops: &[UserOperation],
        account: &Account,
        nonce: U256,
        attempt: u64,
    ) -> Result<H256, BundlerError>;
}

/// Scales an estimate by the attempt number: attempt 1 sends the estimate
/// unchanged, attempt N sends N times the estimate.
pub fn escalate(estimate: U256, attempt: u64) -> Result<U256, BundlerError> {
    validate_attempt(attempt)?;
    estimate
        .checked_mul(U256::from(attempt))
        .ok_or_else(|| BundlerError::Submission("escalated gas overflows".to_string()))
}

/// Attempt numbers start at 1; they double as the gas multiplier.
fn validate_attempt(attempt: u64) -> Result<(), BundlerError> {
    if attempt < 1 {
        return Err(BundlerError::Config(
            "Gas multiplier must be greater than or equal to 1".to_string(),
        ));
    }
    Ok(())
}

pub struct EntryPointSubmitter<C> {
    accessor: Arc<C>,
    entry_point: Address,
    chain_id: u64,
    escalate_fees: bool,
}

impl<C: ChainAccessor> EntryPointSubmitter<C> {
    pub fn new(accessor: Arc<C>, entry_point: Address, chain_id: u64, escalate_fees: bool) -> Self {
        Self {
            accessor,
            entry_point,
            chain_id,
            escalate_fees,
        }
    }

    async fn build_transaction(
        &self,
        ops: &[UserOperation],
        account: &Account,
        nonce: U256,
        attempt: u64,
    ) -> Result<TypedTransaction, BundlerError> {
        let call = HandleOpsCall {
            ops: ops.iter().cloned().map(Into::into).collect(),
            beneficiary: account.address(),
        };

        let (mut max_fee_per_gas, mut max_priority_fee_per_gas) = self
            .accessor
            .estimate_fees()
            .await
            .map_err(|e| submission_error(&e))?;
        if self.escalate_fees {
            max_fee_per_gas = escalate(max_fee_per_gas, attempt)?;
            max_priority_fee_per_gas = escalate(max_priority_fee_per_gas, attempt)?;
        }

        let mut tx: TypedTransaction = Eip1559TransactionRequest {
            from: Some(account.address()),
            to: Some(self.entry_point.into()),
            data: Some(call.encode().into()),
            nonce: Some(nonce),
            chain_id: Some(U64::from(self.chain_id)),
            max_fee_per_gas: Some(max_fee_per_gas),
            max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
            ..Default::default()
        }
        .into();

        let estimated = self
            .accessor
            .estimate_gas(&tx)
            .await
            .map_err(|e| submission_error(&e))?;
        let gas_limit = escalate(estimated, attempt)?;
        debug!(
            "Gas for attempt {}: estimated {}, limit {}",
            attempt, estimated, gas_limit
        );
        tx.set_gas(gas_limit);

        Ok(tx)
    }
}

#[async_trait]
impl<C: ChainAccessor> Submitter for EntryPointSubmitter<C> {
    async fn send(
        &self,
        ops: &[UserOperation],
        account: &Account,
        nonce: U256,
        attempt: u64,
    ) -> Result<H256, BundlerError> {
        validate_attempt(attempt)?;

        let tx = self.build_transaction(ops, account, nonce, attempt).await?;

        let signature = account.sign(&tx).map_err(|e| {
            error!("Failed to sign handleOps for {:?}: {}", account.address(), e);
            BundlerError::Submission(format!("Failed to submit user operation: {e}"))
        })?;

        let hash = self
            .accessor
            .broadcast(tx.rlp_signed(&signature))
            .await
            .map_err(|e| submission_error(&e))?;

        info!(
            "Sent handleOps with {} user operations, hash: {:?}, account: {:?}, nonce: {}, attempt: {}",
            ops.len(),
            hash,
            account.address(),
            nonce,
            attempt
        );
        Ok(hash)
    }
}

fn submission_error(err: &anyhow::Error) -> BundlerError {
    error!("Failed to submit user operation: {:?}", err);
    BundlerError::Submission(format!("Failed to submit user operation: {}", summarize(err)))
}
