// src/rpc.rs
use ethers::types::{Address, H256, U64};
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::RpcModule;
use tracing::{debug, error, info};

use crate::chain::ChainAccessor;
use crate::manager::UserOpManager;
use crate::monitor::TransactionWatcher;
use crate::submitter::Submitter;
use crate::types::{HealthStatus, UserOperation};

// Define the RPC interface
#[rpc(server, namespace = "eth")]
pub trait BundlerRpc {
    /// Relays a user operation through the entry point and returns the hash
    /// of the first handleOps transaction.
    ///
    /// The hash is the standard JSON-RPC `result` member, not a top-level
    /// `txHash`. Failures are reported in the error object with HTTP 200:
    /// -32602 for a malformed operation, -32603 for lease timeouts and
    /// chain or submission faults.
    #[method(name = "sendUserOperation")]
    async fn send_user_operation(&self, user_operation: serde_json::Value) -> RpcResult<H256>;

    #[method(name = "chainId")]
    fn chain_id(&self) -> RpcResult<U64>;

    #[method(name = "supportedEntryPoints")]
    fn supported_entry_points(&self) -> RpcResult<Vec<Address>>;
}

#[rpc(server, namespace = "bundler")]
pub trait HealthRpc {
    /// Account pool and pending transaction counts.
    #[method(name = "health")]
    fn health(&self) -> RpcResult<HealthStatus>;
}

pub struct BundlerRpcImpl<C, S, W> {
    manager: UserOpManager<C, S, W>,
    entry_point: Address,
    chain_id: u64,
}

impl<C, S, W> Clone for BundlerRpcImpl<C, S, W> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            entry_point: self.entry_point,
            chain_id: self.chain_id,
        }
    }
}

impl<C, S, W> BundlerRpcImpl<C, S, W> {
    pub fn new(manager: UserOpManager<C, S, W>, entry_point: Address, chain_id: u64) -> Self {
        Self {
            manager,
            entry_point,
            chain_id,
        }
    }
}

#[async_trait]
impl<C, S, W> BundlerRpcServer for BundlerRpcImpl<C, S, W>
where
    C: ChainAccessor,
    S: Submitter,
    W: TransactionWatcher,
{
    async fn send_user_operation(&self, user_operation: serde_json::Value) -> RpcResult<H256> {
        let user_op = UserOperation::from_json(user_operation).map_err(|e| {
            debug!("Rejected user operation: {}", e);
            e
        })?;
        let sender = user_op.sender;
        debug!("Received user operation from sender: {:?}", sender);

        match self.manager.handle_user_ops(vec![user_op]).await {
            Ok(hash) => {
                info!("Relayed user operation from {:?} in {:?}", sender, hash);
                Ok(hash)
            }
            Err(e) => {
                error!("Failed to relay user operation from {:?}: {}", sender, e);
                Err(e.into())
            }
        }
    }

    fn chain_id(&self) -> RpcResult<U64> {
        Ok(U64::from(self.chain_id))
    }

    fn supported_entry_points(&self) -> RpcResult<Vec<Address>> {
        Ok(vec![self.entry_point])
    }
}

impl<C, S, W> HealthRpcServer for BundlerRpcImpl<C, S, W>
where
    C: ChainAccessor,
    S: Submitter,
    W: TransactionWatcher,
{
    fn health(&self) -> RpcResult<HealthStatus> {
        let pool = self.manager.pool();
        Ok(HealthStatus {
            total_accounts: pool.total(),
            available_accounts: pool.available(),
            pending_transactions: self.manager.pending_count(),
        })
    }
}

pub fn register_methods<C, S, W>(
    module: &mut RpcModule<()>,
    rpc: BundlerRpcImpl<C, S, W>,
) -> anyhow::Result<()>
where
    C: ChainAccessor,
    S: Submitter,
    W: TransactionWatcher,
{
    module.merge(BundlerRpcServer::into_rpc(rpc.clone()))?;
    module.merge(HealthRpcServer::into_rpc(rpc))?;

    Ok(())
}
