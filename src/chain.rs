// src/chain.rs
use anyhow::Context;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, TransactionReceipt, H256, U256,
};
#[cfg(test)]
use mockall::automock;

/// Read/write view of the node used by the submitter and the monitor.
///
/// `get_receipt` returns `Ok(None)` while a transaction is not yet mined;
/// only genuine faults come back as errors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainAccessor: Send + Sync + 'static {
    async fn get_nonce(&self, address: Address) -> anyhow::Result<U256>;

    /// Current `(max_fee_per_gas, max_priority_fee_per_gas)` suggestion.
    async fn estimate_fees(&self) -> anyhow::Result<(U256, U256)>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> anyhow::Result<U256>;

    async fn broadcast(&self, raw_tx: Bytes) -> anyhow::Result<H256>;

    async fn get_receipt(&self, hash: H256) -> anyhow::Result<Option<TransactionReceipt>>;
}

#[async_trait]
impl<M> ChainAccessor for M
where
    M: Middleware + 'static,
    M::Error: 'static,
{
    async fn get_nonce(&self, address: Address) -> anyhow::Result<U256> {
        self.get_transaction_count(address, None)
            .await
            .context("should load transaction count")
    }

    async fn estimate_fees(&self) -> anyhow::Result<(U256, U256)> {
        self.estimate_eip1559_fees(None)
            .await
            .context("should estimate fees per gas")
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> anyhow::Result<U256> {
        Middleware::estimate_gas(self, tx, None)
            .await
            .context("should estimate gas for handleOps")
    }

    async fn broadcast(&self, raw_tx: Bytes) -> anyhow::Result<H256> {
        let pending = self
            .send_raw_transaction(raw_tx)
            .await
            .context("should send raw transaction to node")?;
        Ok(pending.tx_hash())
    }

    async fn get_receipt(&self, hash: H256) -> anyhow::Result<Option<TransactionReceipt>> {
        self.get_transaction_receipt(hash)
            .await
            .context("should load transaction receipt")
    }
}
