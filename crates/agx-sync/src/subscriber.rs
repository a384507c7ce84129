//! # Event Subscriber
//!
//! Polls the ledger for logs that have reached the configured confirmation
//! depth and forwards them, in ledger order, to the projector.

use std::sync::Arc;
use std::time::Duration;

use agx_ledger::{LedgerClient, LedgerError, LedgerEvent};
use tokio::sync::{mpsc, watch};

/// Ledger log poller.
pub struct EventSubscriber {
    ledger: Arc<dyn LedgerClient>,
    poll_interval: Duration,
    next_block: u64,
}

impl std::fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscriber")
            .field("poll_interval", &self.poll_interval)
            .field("next_block", &self.next_block)
            .finish()
    }
}

impl EventSubscriber {
    /// Start polling at `from_block`. Pass the projection cursor's block so
    /// the tail of a partly applied block is delivered again; the projector
    /// drops what it has already seen.
    pub fn new(ledger: Arc<dyn LedgerClient>, poll_interval: Duration, from_block: u64) -> Self {
        Self {
            ledger,
            poll_interval,
            next_block: from_block,
        }
    }

    /// The next block to be fetched.
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Fetch events from the next block up to the deepest confirmed block.
    pub async fn poll_once(&mut self) -> Result<Vec<LedgerEvent>, LedgerError> {
        let head = self.ledger.block_number().await?;
        let depth = self.ledger.config().confirmations.max(1);
        let Some(safe) = head.checked_sub(depth - 1) else {
            return Ok(Vec::new());
        };
        if safe < self.next_block {
            return Ok(Vec::new());
        }
        let events = self.ledger.events(self.next_block, safe).await?;
        self.next_block = safe + 1;
        Ok(events)
    }

    /// Poll until `shutdown` flips to true or the receiver goes away.
    pub async fn run(mut self, events: mpsc::Sender<LedgerEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(batch) => {
                            if !batch.is_empty() {
                                tracing::debug!(count = batch.len(), next_block = self.next_block, "ledger events fetched");
                            }
                            for event in batch {
                                if events.send(event).await.is_err() {
                                    tracing::info!("event receiver dropped, subscriber stopping");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, next_block = self.next_block, "ledger poll failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("event subscriber stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agx_core::{Address, ShipmentRef, TokenAmount};
    use agx_ledger::{LedgerCall, LedgerConfig, MockLedger};

    fn create(n: u8) -> LedgerCall {
        LedgerCall::CreateShipment {
            shipment: ShipmentRef::new(format!("s-{n}")).unwrap().key(),
            ask_price: TokenAmount::from_base_units(10),
        }
    }

    #[tokio::test]
    async fn polls_advance_past_delivered_blocks() {
        let ledger = Arc::new(MockLedger::local());
        let farmer = Address::from_bytes([1; 20]);
        ledger.submit(farmer, create(1)).await.unwrap();

        let mut sub = EventSubscriber::new(ledger.clone(), Duration::from_millis(10), 0);
        assert_eq!(sub.poll_once().await.unwrap().len(), 1);
        assert!(sub.poll_once().await.unwrap().is_empty());

        ledger.submit(farmer, create(2)).await.unwrap();
        let next = sub.poll_once().await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].data.name(), "ShipmentCreated");
    }

    #[tokio::test]
    async fn unconfirmed_blocks_are_held_back() {
        let config = MockLedger::local().config().clone().with_confirmations(3);
        let ledger = Arc::new(MockLedger::new(config));
        ledger.submit(Address::from_bytes([1; 20]), create(1)).await.unwrap();

        let mut sub = EventSubscriber::new(ledger.clone(), Duration::from_millis(10), 0);
        assert!(sub.poll_once().await.unwrap().is_empty());
        ledger.mine_empty(2);
        assert_eq!(sub.poll_once().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let ledger: Arc<dyn LedgerClient> = Arc::new(MockLedger::new(LedgerConfig::new(
            1,
            Address::from_bytes([0x5e; 20]),
            Address::from_bytes([0xe5; 20]),
        )));
        let (tx, _rx) = mpsc::channel(8);
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(EventSubscriber::new(ledger, Duration::from_millis(5), 0).run(tx, shutdown));
        stop.send(true).unwrap();
        handle.await.unwrap();
    }
}
