// src/config.rs
use std::fmt;
use std::time::Duration;

use ethers::types::Address;

use crate::error::BundlerError;

/// Minimum number of signing accounts; one account cannot both hold a retry
/// chain and serve new submissions.
pub const MIN_ACCOUNTS: usize = 2;

/// Immutable settings shared by the pool, submitter, monitor and manager.
#[derive(Clone)]
pub struct BundlerConfig {
    pub entry_point: Address,
    pub chain_id: u64,
    /// Hex-encoded private keys of the hot wallets.
    pub private_keys: Vec<String>,
    /// Longest a caller waits for a free account.
    pub lease_timeout: Duration,
    /// Longest a single watch waits for a receipt before declaring the
    /// transaction stuck.
    pub watch_deadline: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u64,
    /// Pause before resubmitting after a reverted transaction.
    pub revert_backoff: Duration,
    /// Pause before re-arming a watch that failed on the read path.
    pub rearm_delay: Duration,
    /// Upper bound on re-armed watches per transaction, `None` for unbounded.
    pub max_watch_rearms: Option<u32>,
    /// Also multiply both EIP-1559 fee fields by the attempt number.
    pub escalate_fees: bool,
}

impl BundlerConfig {
    pub fn validate(&self) -> Result<(), BundlerError> {
        if self.private_keys.len() < MIN_ACCOUNTS {
            return Err(BundlerError::Config(format!(
                "Need at least {MIN_ACCOUNTS} EOAs, got {}",
                self.private_keys.len()
            )));
        }
        if self.max_attempts == 0 {
            return Err(BundlerError::Config(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(BundlerError::Config(
                "poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: self.poll_interval,
            watch_deadline: self.watch_deadline,
        }
    }
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            entry_point: Address::zero(),
            chain_id: 1,
            private_keys: vec![],
            lease_timeout: Duration::from_millis(5_000),
            watch_deadline: Duration::from_millis(120_000),
            poll_interval: Duration::from_millis(10_000),
            max_attempts: 3,
            revert_backoff: Duration::from_millis(30_000),
            rearm_delay: Duration::from_millis(10_000),
            max_watch_rearms: None,
            escalate_fees: false,
        }
    }
}

// Keys stay out of logs.
impl fmt::Debug for BundlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundlerConfig")
            .field("entry_point", &self.entry_point)
            .field("chain_id", &self.chain_id)
            .field("private_keys", &format_args!("[{} redacted]", self.private_keys.len()))
            .field("lease_timeout", &self.lease_timeout)
            .field("watch_deadline", &self.watch_deadline)
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .field("revert_backoff", &self.revert_backoff)
            .field("rearm_delay", &self.rearm_delay)
            .field("max_watch_rearms", &self.max_watch_rearms)
            .field("escalate_fees", &self.escalate_fees)
            .finish()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub watch_deadline: Duration,
}
