// src/pool.rs
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use ethers::signers::{LocalWallet, Signer, WalletError};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Signature};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::config::MIN_ACCOUNTS;
use crate::error::BundlerError;

/// A hot wallet that can sign entry point transactions.
#[derive(Clone)]
pub struct Account {
    wallet: LocalWallet,
}

impl Account {
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn sign(&self, tx: &TypedTransaction) -> Result<Signature, WalletError> {
        self.wallet.sign_transaction_sync(tx)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account {{ address: {:?} }}", self.address())
    }
}

/// Fixed set of accounts handed out under exclusive lease.
///
/// A released account goes straight to the oldest live waiter, so it never
/// passes through the free state while somebody is queued for it.
pub struct AccountPool {
    accounts: Vec<Account>,
    state: Mutex<PoolState>,
}

struct PoolState {
    leased: HashMap<Address, bool>,
    waiters: VecDeque<oneshot::Sender<Account>>,
}

impl AccountPool {
    pub fn new(private_keys: &[String], chain_id: u64) -> Result<Self, BundlerError> {
        if private_keys.len() < MIN_ACCOUNTS {
            return Err(BundlerError::Config(format!(
                "Need at least {MIN_ACCOUNTS} EOAs"
            )));
        }

        let accounts = private_keys
            .iter()
            .map(|key| {
                key.trim()
                    .parse::<LocalWallet>()
                    .map(|wallet| Account {
                        wallet: wallet.with_chain_id(chain_id),
                    })
                    .map_err(|e| BundlerError::Config(format!("invalid private key: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut leased = HashMap::with_capacity(accounts.len());
        for account in &accounts {
            if leased.insert(account.address(), false).is_some() {
                return Err(BundlerError::Config(format!(
                    "duplicate EOA {:?}",
                    account.address()
                )));
            }
        }

        info!("Initialized account pool with {} EOAs", accounts.len());

        Ok(Self {
            accounts,
            state: Mutex::new(PoolState {
                leased,
                waiters: VecDeque::new(),
            }),
        })
    }

    /// Leases a free account, waiting up to `timeout` for one to be returned.
    ///
    /// Cancel safe: an account handed to a waiter whose future is dropped
    /// goes back to the pool.
    pub async fn lease(&self, timeout: Duration) -> Result<Account, BundlerError> {
        let mut waiter = {
            let mut state = self.state.lock();
            if let Some(account) = self.claim_free(&mut state) {
                debug!("Leased EOA {:?}", account.address());
                return Ok(account);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.retain(|waiter| !waiter.is_closed());
            state.waiters.push_back(tx);
            Waiter { pool: self, rx }
        };

        debug!("All EOAs busy, waiting up to {:?}", timeout);
        match tokio::time::timeout(timeout, &mut waiter.rx).await {
            Ok(Ok(account)) => {
                debug!("Leased returned EOA {:?}", account.address());
                Ok(account)
            }
            Ok(Err(_)) => Err(BundlerError::Internal(
                "account pool dropped a waiter".to_string(),
            )),
            // A release may have raced the timer; keep what it handed over.
            Err(_) => waiter
                .reclaim()
                .ok_or_else(|| BundlerError::LeaseTimeout("No available EOAs".to_string())),
        }
    }

    /// Returns a leased account, handing it to the oldest waiter if any.
    pub fn release(&self, account: Account) -> Result<(), BundlerError> {
        let address = account.address();
        let mut state = self.state.lock();

        match state.leased.get(&address) {
            Some(true) => {}
            Some(false) => {
                error!("EOA {:?} released while not leased", address);
                return Err(BundlerError::Internal(format!(
                    "EOA {address:?} is not leased"
                )));
            }
            None => {
                error!("EOA {:?} does not belong to the pool", address);
                return Err(BundlerError::Internal(format!(
                    "EOA {address:?} is not part of the pool"
                )));
            }
        }

        let mut account = account;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(account) {
                Ok(()) => {
                    debug!("Handed EOA {:?} to a waiting caller", address);
                    return Ok(());
                }
                // The waiter timed out; try the next one.
                Err(returned) => account = returned,
            }
        }

        debug!("Releasing EOA {:?}", address);
        state.leased.insert(address, false);
        Ok(())
    }

    /// Whether `address` is currently leased, `None` for unknown addresses.
    #[cfg(test)]
    pub fn is_leased(&self, address: &Address) -> Option<bool> {
        self.state.lock().leased.get(address).copied()
    }

    pub fn available(&self) -> usize {
        self.state.lock().leased.values().filter(|leased| !**leased).count()
    }

    pub fn total(&self) -> usize {
        self.accounts.len()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(Account::address).collect()
    }

    fn claim_free(&self, state: &mut PoolState) -> Option<Account> {
        let account = self
            .accounts
            .iter()
            .find(|account| matches!(state.leased.get(&account.address()), Some(false)))?;
        state.leased.insert(account.address(), true);
        Some(account.clone())
    }
}

/// A queued lease request.
struct Waiter<'a> {
    pool: &'a AccountPool,
    rx: oneshot::Receiver<Account>,
}

impl Waiter<'_> {
    /// Stops further handoffs and takes any account already delivered.
    fn reclaim(&mut self) -> Option<Account> {
        self.rx.close();
        self.rx.try_recv().ok()
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(account) = self.reclaim() {
            debug!("Returning EOA {:?} from an abandoned lease", account.address());
            if let Err(e) = self.pool.release(account) {
                error!("Failed to return EOA to the pool: {}", e);
            }
        }
    }
}
