//! Subscriber loop.
//!
//! Deliveries are handed to the handler one at a time. A failed delivery is
//! put back on the subscription after `redelivery_delay_ms`, up to
//! `max_redeliveries` times, and then parked in the dead-letter list.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use approvalflow_config::EventsConfig;

use crate::bus::{Delivery, Subscription};
use crate::handler::EventHandler;

/// Counters shared between a running subscriber and its owner.
#[derive(Debug, Default)]
pub struct SubscriberStats {
    processed: AtomicU64,
    redelivered: AtomicU64,
    dead_letters: RwLock<Vec<Delivery>>,
}

impl SubscriberStats {
    /// Deliveries the handler acknowledged.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Deliveries scheduled for another attempt.
    pub fn redelivered(&self) -> u64 {
        self.redelivered.load(Ordering::SeqCst)
    }

    /// Deliveries that exhausted their redeliveries.
    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.dead_letters.read().clone()
    }
}

/// Drains one subscription into one handler.
pub struct EventSubscriber {
    subscription: Subscription,
    handler: Arc<dyn EventHandler>,
    max_redeliveries: u32,
    redelivery_delay: Duration,
    stats: Arc<SubscriberStats>,
}

impl EventSubscriber {
    pub fn new(subscription: Subscription, handler: Arc<dyn EventHandler>, config: &EventsConfig) -> Self {
        Self {
            subscription,
            handler,
            max_redeliveries: config.max_redeliveries,
            redelivery_delay: Duration::from_millis(config.redelivery_delay_ms),
            stats: Arc::new(SubscriberStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SubscriberStats> {
        self.stats.clone()
    }

    /// Run until shutdown or until the bus goes away.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Subscriber '{}' started on topic {}",
            self.handler.name(),
            self.subscription.topic()
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Subscriber '{}' shutting down", self.handler.name());
                    break;
                }
                delivery = self.subscription.recv() => {
                    match delivery {
                        Some(delivery) => self.dispatch(delivery).await,
                        None => {
                            info!("Topic {} closed, subscriber '{}' exiting", self.subscription.topic(), self.handler.name());
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        let event_id = delivery.event.event_id;
        match self.handler.handle(&delivery.event).await {
            Ok(()) => {
                self.stats.processed.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "Handler '{}' processed event {} (attempt {})",
                    self.handler.name(),
                    event_id,
                    delivery.attempt
                );
            }
            Err(e) if delivery.attempt <= self.max_redeliveries => {
                warn!(
                    "Handler '{}' failed event {} (attempt {}): {}, redelivering",
                    self.handler.name(),
                    event_id,
                    delivery.attempt,
                    e
                );
                self.schedule_redelivery(delivery.next_attempt());
            }
            Err(e) => {
                error!(
                    "Handler '{}' gave up on event {} after {} attempts: {}",
                    self.handler.name(),
                    event_id,
                    delivery.attempt,
                    e
                );
                self.stats.dead_letters.write().push(delivery);
            }
        }
    }

    fn schedule_redelivery(&self, delivery: Delivery) {
        self.stats.redelivered.fetch_add(1, Ordering::SeqCst);
        let requeue = self.subscription.requeue_handle();
        let stats = self.stats.clone();
        let delay = self.redelivery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let sent = match requeue.upgrade() {
                Some(sender) => sender.send(delivery).await.map_err(|e| e.0),
                None => Err(delivery),
            };
            if let Err(delivery) = sent {
                warn!("Subscription closed before redelivery of event {}", delivery.event.event_id);
                stats.dead_letters.write().push(delivery);
            }
        });
    }
}
