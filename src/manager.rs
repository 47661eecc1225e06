// src/manager.rs
use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::{H256, U256};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::chain::ChainAccessor;
use crate::config::BundlerConfig;
use crate::error::{summarize, BundlerError};
use crate::monitor::{Outcome, TransactionWatcher};
use crate::pool::{Account, AccountPool};
use crate::submitter::Submitter;
use crate::types::UserOperation;

/// An in-flight handleOps transaction and the lease it holds.
#[derive(Debug)]
struct PendingTransaction {
    ops: Arc<Vec<UserOperation>>,
    account: Account,
    nonce: U256,
    attempt: u64,
}

/// Leases an account per batch, submits it, and drives retries in the
/// background until the transaction settles or the attempt budget runs out.
///
/// The leased account stays with one batch across all of its retries and is
/// returned exactly once when the chain ends. From the first broadcast until
/// then, the batch has exactly one record in the pending map, re-keyed to the
/// latest hash on every resubmission.
pub struct UserOpManager<C, S, W> {
    inner: Arc<Inner<C, S, W>>,
}

impl<C, S, W> Clone for UserOpManager<C, S, W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C, S, W> {
    pool: Arc<AccountPool>,
    accessor: Arc<C>,
    submitter: Arc<S>,
    watcher: Arc<W>,
    config: BundlerConfig,
    pending: Mutex<HashMap<H256, PendingTransaction>>,
}

impl<C, S, W> UserOpManager<C, S, W>
where
    C: ChainAccessor,
    S: Submitter,
    W: TransactionWatcher,
{
    pub fn new(
        pool: Arc<AccountPool>,
        accessor: Arc<C>,
        submitter: Arc<S>,
        watcher: Arc<W>,
        config: BundlerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                accessor,
                submitter,
                watcher,
                config,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Submits a batch and returns the hash of its first broadcast.
    ///
    /// Settlement, retries and the release of the account happen in a
    /// background task; later attempts' hashes are only logged.
    pub async fn handle_user_ops(&self, ops: Vec<UserOperation>) -> Result<H256, BundlerError> {
        if ops.is_empty() {
            return Err(BundlerError::InvalidUserOperation(
                "no user operations to submit".to_string(),
            ));
        }

        // Detached so that dropping this future cannot strand a leased account.
        match tokio::spawn(self.inner.clone().start(ops)).await {
            Ok(result) => result,
            Err(e) => Err(BundlerError::Internal(format!(
                "user operation task failed: {e}"
            ))),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn pool(&self) -> &AccountPool {
        &self.inner.pool
    }
}

impl<C, S, W> Inner<C, S, W>
where
    C: ChainAccessor,
    S: Submitter,
    W: TransactionWatcher,
{
    async fn start(self: Arc<Self>, ops: Vec<UserOperation>) -> Result<H256, BundlerError> {
        let account = self.pool.lease(self.config.lease_timeout).await?;

        let nonce = match self.accessor.get_nonce(account.address()).await {
            Ok(nonce) => nonce,
            Err(e) => {
                error!(
                    "Failed to get transaction count for {:?}: {:?}",
                    account.address(),
                    e
                );
                self.release(account);
                return Err(BundlerError::Network(format!(
                    "Failed to get transaction count: {}",
                    summarize(&e)
                )));
            }
        };

        let ops = Arc::new(ops);
        let hash = match self.submitter.send(&ops, &account, nonce, 1).await {
            Ok(hash) => hash,
            Err(e) => {
                self.release(account);
                return Err(e);
            }
        };

        self.pending.lock().insert(
            hash,
            PendingTransaction {
                ops,
                account,
                nonce,
                attempt: 1,
            },
        );
        tokio::spawn(self.clone().track(hash));

        Ok(hash)
    }

    /// Follows one batch from its first hash to the end of its retry chain.
    async fn track(self: Arc<Self>, first_hash: H256) {
        let mut hash = first_hash;
        let mut rearms = 0u32;
        loop {
            let (nonce, attempt) = match self.watcher.watch(hash).await {
                Outcome::Mined(receipt) => {
                    if let Some(tx) = self.take_pending(hash) {
                        info!(
                            "Transaction {:?} succeeded in block {:?} after {} attempt(s)",
                            hash, receipt.block_number, tx.attempt
                        );
                        self.release(tx.account);
                    }
                    return;
                }
                Outcome::Reverted(receipt) => {
                    let Some((nonce, attempt)) = self.position(hash) else {
                        return;
                    };
                    warn!(
                        "Transaction {:?} reverted in block {:?}. Retrying with nonce {} ...",
                        hash,
                        receipt.block_number,
                        nonce + U256::one()
                    );
                    tokio::time::sleep(self.config.revert_backoff).await;
                    (nonce + U256::one(), attempt + 1)
                }
                Outcome::TimedOut => {
                    let Some((nonce, attempt)) = self.position(hash) else {
                        return;
                    };
                    warn!(
                        "Transaction {:?} timed out. Replacing with nonce {} ...",
                        hash, nonce
                    );
                    (nonce, attempt + 1)
                }
                Outcome::MonitoringError(e) => {
                    rearms += 1;
                    if let Some(max) = self.config.max_watch_rearms {
                        if rearms > max {
                            self.abandon(
                                hash,
                                BundlerError::Network(format!(
                                    "{max} monitoring errors, last: {e}"
                                )),
                            );
                            return;
                        }
                    }
                    warn!(
                        "An error occurred while monitoring transaction {:?}: {}. Watching again ...",
                        hash, e
                    );
                    tokio::time::sleep(self.config.rearm_delay).await;
                    continue;
                }
            };

            match self.resubmit(hash, nonce, attempt).await {
                Some(next) => {
                    hash = next;
                    rearms = 0;
                }
                None => return,
            }
        }
    }

    /// Sends the next attempt for the batch recorded under `hash`.
    ///
    /// The record stays under `hash` until the new broadcast replaces it, or
    /// until the chain is abandoned and its account returned.
    async fn resubmit(&self, hash: H256, nonce: U256, attempt: u64) -> Option<H256> {
        let max_attempts = self.config.max_attempts;
        if attempt > max_attempts {
            self.abandon(
                hash,
                BundlerError::TransactionFailed(format!(
                    "Transaction failed after {max_attempts} attempts"
                )),
            );
            return None;
        }

        let (ops, account) = {
            let pending = self.pending.lock();
            let tx = pending.get(&hash)?;
            (tx.ops.clone(), tx.account.clone())
        };

        match self.submitter.send(&ops, &account, nonce, attempt).await {
            Ok(next) => {
                let mut pending = self.pending.lock();
                let mut tx = pending.remove(&hash)?;
                tx.nonce = nonce;
                tx.attempt = attempt;
                pending.insert(next, tx);
                debug!("Attempt {} broadcast as {:?}, replacing {:?}", attempt, next, hash);
                Some(next)
            }
            Err(e) => {
                self.abandon(hash, e);
                None
            }
        }
    }

    fn position(&self, hash: H256) -> Option<(U256, u64)> {
        let position = self
            .pending
            .lock()
            .get(&hash)
            .map(|tx| (tx.nonce, tx.attempt));
        if position.is_none() {
            error!("No pending transaction recorded for {:?}", hash);
        }
        position
    }

    fn abandon(&self, hash: H256, reason: BundlerError) {
        if let Some(tx) = self.take_pending(hash) {
            error!("Giving up on transaction {:?}: {}", hash, reason);
            self.release(tx.account);
        }
    }

    fn take_pending(&self, hash: H256) -> Option<PendingTransaction> {
        let tx = self.pending.lock().remove(&hash);
        if tx.is_none() {
            error!("No pending transaction recorded for {:?}", hash);
        }
        tx
    }

    fn release(&self, account: Account) {
        if let Err(e) = self.pool.release(account) {
            error!("Failed to return EOA to the pool: {}", e);
        }
    }
}
