// src/main.rs
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use ethers::providers::{Http, Provider};
use ethers::types::Address;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::RpcModule;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod chain;
mod config;
mod contracts;
mod error;
mod manager;
mod monitor;
mod pool;
mod rpc;
mod submitter;
mod types;

use crate::config::BundlerConfig;
use crate::manager::UserOpManager;
use crate::monitor::ReceiptMonitor;
use crate::pool::AccountPool;
use crate::rpc::BundlerRpcImpl;
use crate::submitter::EntryPointSubmitter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, env = "BUNDLER_RPC_ADDR", default_value = "127.0.0.1:3000")]
    rpc_server_addr: String,

    #[clap(short, long, env = "ETH_RPC_URL")]
    eth_rpc_url: String,

    #[clap(short, long, env = "CHAIN_ID")]
    chain_id: u64,

    #[clap(
        long,
        env = "ENTRY_POINT",
        default_value = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789",
        value_parser = parse_address
    )]
    entry_point: Address,

    /// Comma-separated hot wallet private keys, at least two.
    #[clap(long, env = "BUNDLER_PRIVATE_KEYS", value_delimiter = ',', hide_env_values = true)]
    private_keys: Vec<String>,

    #[clap(long, env = "LEASE_TIMEOUT_MS", default_value_t = 5_000)]
    lease_timeout_ms: u64,

    #[clap(long, env = "WATCH_DEADLINE_MS", default_value_t = 120_000)]
    watch_deadline_ms: u64,

    #[clap(long, env = "POLL_INTERVAL_MS", default_value_t = 10_000)]
    poll_interval_ms: u64,

    #[clap(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u64,

    #[clap(long, env = "REVERT_BACKOFF_MS", default_value_t = 30_000)]
    revert_backoff_ms: u64,

    #[clap(long, env = "REARM_DELAY_MS", default_value_t = 10_000)]
    rearm_delay_ms: u64,

    /// Give up on a transaction after this many failed receipt lookups.
    #[clap(long, env = "MAX_WATCH_REARMS")]
    max_watch_rearms: Option<u32>,

    /// Multiply fee fields by the attempt number as well as the gas limit.
    #[clap(long, env = "ESCALATE_FEES")]
    escalate_fees: bool,

    #[clap(long, env = "LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_str(s).map_err(|_| format!("String {s} is not a valid address"))
}

impl From<Args> for BundlerConfig {
    fn from(args: Args) -> Self {
        Self {
            entry_point: args.entry_point,
            chain_id: args.chain_id,
            private_keys: args.private_keys,
            lease_timeout: Duration::from_millis(args.lease_timeout_ms),
            watch_deadline: Duration::from_millis(args.watch_deadline_ms),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            max_attempts: args.max_attempts,
            revert_backoff: Duration::from_millis(args.revert_backoff_ms),
            rearm_delay: Duration::from_millis(args.rearm_delay_ms),
            max_watch_rearms: args.max_watch_rearms,
            escalate_fees: args.escalate_fees,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    let provider = Arc::new(Provider::<Http>::try_from(args.eth_rpc_url.as_str())?);

    let config = BundlerConfig::from(args);
    config.validate()?;
    info!("Starting bundler with {:?}", config);

    let pool = Arc::new(AccountPool::new(&config.private_keys, config.chain_id)?);
    info!("Loaded bundler accounts: {:?}", pool.addresses());
    let submitter = Arc::new(EntryPointSubmitter::new(
        provider.clone(),
        config.entry_point,
        config.chain_id,
        config.escalate_fees,
    ));
    let monitor = Arc::new(ReceiptMonitor::new(
        provider.clone(),
        config.monitor_settings(),
    ));
    let manager = UserOpManager::new(pool, provider, submitter, monitor, config.clone());
    let bundler_rpc = BundlerRpcImpl::new(manager, config.entry_point, config.chain_id);

    info!("Starting ERC-4337 bundler RPC server on {}", server_addr);

    // Start the JSON-RPC server
    let server_handle = start_server(server_addr, bundler_rpc).await?;

    // Keep the server running until Ctrl+C is pressed
    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

async fn start_server<C, S, W>(
    server_addr: SocketAddr,
    bundler_rpc: BundlerRpcImpl<C, S, W>,
) -> anyhow::Result<ServerHandle>
where
    C: chain::ChainAccessor,
    S: submitter::Submitter,
    W: monitor::TransactionWatcher,
{
    let server = ServerBuilder::default().build(server_addr).await?;

    let mut module = RpcModule::new(());
    rpc::register_methods(&mut module, bundler_rpc)?;
    let server_handle = server.start(module);

    Ok(server_handle)
}
