// src/monitor.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{TransactionReceipt, H256, U64};
use tokio::time::{self, Instant};
use tracing::{debug, error};

use crate::chain::ChainAccessor;
use crate::config::MonitorSettings;
use crate::error::summarize;

/// Terminal result of watching one transaction hash.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Mined(TransactionReceipt),
    Reverted(TransactionReceipt),
    /// The read path failed for a reason other than "not mined yet".
    MonitoringError(String),
    TimedOut,
}

/// Watches a transaction hash until it reaches a terminal [`Outcome`].
#[async_trait]
pub trait TransactionWatcher: Send + Sync + 'static {
    async fn watch(&self, hash: H256) -> Outcome;
}

/// Polls the node for a receipt at a fixed interval until it is mined or the
/// watch deadline passes. Each call runs its own clock.
pub struct ReceiptMonitor<C> {
    accessor: Arc<C>,
    settings: MonitorSettings,
}

impl<C: ChainAccessor> ReceiptMonitor<C> {
    pub fn new(accessor: Arc<C>, settings: MonitorSettings) -> Self {
        Self { accessor, settings }
    }
}

#[async_trait]
impl<C: ChainAccessor> TransactionWatcher for ReceiptMonitor<C> {
    async fn watch(&self, hash: H256) -> Outcome {
        let deadline = Instant::now() + self.settings.watch_deadline;
        loop {
            match self.accessor.get_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return if receipt.status == Some(U64::one()) {
                        Outcome::Mined(receipt)
                    } else {
                        Outcome::Reverted(receipt)
                    };
                }
                Ok(None) => {
                    debug!("Transaction {:?} not mined yet", hash);
                }
                Err(e) => {
                    error!("Failed to get receipt for {:?}: {:?}", hash, e);
                    return Outcome::MonitoringError(summarize(&e));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Outcome::TimedOut;
            }
            time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::chain::MockChainAccessor;

    fn settings() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(10),
            watch_deadline: Duration::from_secs(120),
        }
    }

    fn receipt(status: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0x01),
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_receipt_is_mined() {
        let mut accessor = MockChainAccessor::new();
        accessor
            .expect_get_receipt()
            .times(1)
            .returning(|_| Ok(Some(receipt(1))));

        let monitor = ReceiptMonitor::new(Arc::new(accessor), settings());
        assert_eq!(monitor.watch(H256::repeat_byte(0x01)).await, Outcome::Mined(receipt(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_is_reverted() {
        let mut accessor = MockChainAccessor::new();
        accessor
            .expect_get_receipt()
            .returning(|_| Ok(Some(receipt(0))));

        let monitor = ReceiptMonitor::new(Arc::new(accessor), settings());
        assert_eq!(
            monitor.watch(H256::repeat_byte(0x01)).await,
            Outcome::Reverted(receipt(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_until_the_receipt_appears() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut accessor = MockChainAccessor::new();
        {
            let polls = polls.clone();
            accessor.expect_get_receipt().returning(move |_| {
                if polls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Ok(None)
                } else {
                    Ok(Some(receipt(1)))
                }
            });
        }

        let monitor = ReceiptMonitor::new(Arc::new(accessor), settings());
        let start = Instant::now();
        assert!(matches!(
            monitor.watch(H256::repeat_byte(0x01)).await,
            Outcome::Mined(_)
        ));
        assert_eq!(polls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_the_watch_deadline() {
        let mut accessor = MockChainAccessor::new();
        accessor.expect_get_receipt().returning(|_| Ok(None));

        let monitor = ReceiptMonitor::new(Arc::new(accessor), settings());
        let start = Instant::now();
        assert_eq!(monitor.watch(H256::repeat_byte(0x01)).await, Outcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn accessor_fault_is_a_monitoring_error() {
        let mut accessor = MockChainAccessor::new();
        accessor
            .expect_get_receipt()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("502 Bad Gateway\n<html>...</html>")));

        let monitor = ReceiptMonitor::new(Arc::new(accessor), settings());
        assert_eq!(
            monitor.watch(H256::repeat_byte(0x01)).await,
            Outcome::MonitoringError("502 Bad Gateway".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn each_watch_starts_a_fresh_deadline() {
        let mut accessor = MockChainAccessor::new();
        accessor.expect_get_receipt().returning(|_| Ok(None));

        let monitor = ReceiptMonitor::new(Arc::new(accessor), settings());
        let start = Instant::now();
        assert_eq!(monitor.watch(H256::repeat_byte(0x01)).await, Outcome::TimedOut);
        assert_eq!(monitor.watch(H256::repeat_byte(0x02)).await, Outcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(240));
    }
}
