//! In-process topic bus.
//!
//! Every subscription owns a bounded queue. A publish fans the event out to
//! each live subscription on the event's topic; subscriptions whose receiver
//! was dropped are pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use approvalflow_config::EventsConfig;
use approvalflow_protocols::{EngineResult, EventPublisher, Topic, WorkflowEvent};

use crate::error::BusError;

/// One delivery of an event to a subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: WorkflowEvent,
    /// 1 for the first delivery, incremented on each redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn first(event: WorkflowEvent) -> Self {
        Self { event, attempt: 1 }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            event: self.event.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Receiving side of a topic subscription.
pub struct Subscription {
    topic: Topic,
    receiver: mpsc::Receiver<Delivery>,
    // Weak so that dropping the bus still ends the subscription.
    requeue: mpsc::WeakSender<Delivery>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next delivery, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Put a delivery back on this subscription's queue.
    pub async fn requeue(&self, delivery: Delivery) -> Result<(), BusError> {
        let sender = self
            .requeue
            .upgrade()
            .ok_or_else(|| BusError::TopicClosed(self.topic.to_string()))?;
        sender
            .send(delivery)
            .await
            .map_err(|_| BusError::TopicClosed(self.topic.to_string()))
    }

    pub(crate) fn requeue_handle(&self) -> mpsc::WeakSender<Delivery> {
        self.requeue.clone()
    }
}

/// Topic bus with per-subscription queues.
pub struct EventBus {
    capacity: usize,
    topics: DashMap<Topic, Vec<mpsc::Sender<Delivery>>>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(config: &EventsConfig) -> Self {
        Self::with_capacity(config.topic_capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: DashMap::new(),
            published: AtomicU64::new(0),
        }
    }

    /// Subscribe to a topic.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let requeue = sender.downgrade();
        self.topics.entry(topic).or_default().push(sender);
        debug!("New subscription on topic {}", topic);
        Subscription {
            topic,
            receiver,
            requeue,
        }
    }

    /// Live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .get(&topic)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Events accepted by [`send`](Self::send).
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Fan an event out to its topic. Returns the number of subscriptions
    /// it was handed to.
    pub async fn send(&self, event: WorkflowEvent) -> Result<usize, BusError> {
        let topic = event.topic();
        let senders: Vec<mpsc::Sender<Delivery>> = self
            .topics
            .get(&topic)
            .map(|s| s.clone())
            .unwrap_or_default();
        self.published.fetch_add(1, Ordering::SeqCst);

        if senders.is_empty() {
            debug!("No subscribers on topic {} for event {}", topic, event.event_id);
            return Ok(0);
        }

        let mut delivered = 0;
        for sender in &senders {
            match sender.try_send(Delivery::first(event.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(delivery)) => {
                    // A subscriber may be publishing from inside its own handler;
                    // waiting here could deadlock it.
                    warn!("Topic {} queue full, deferring event {}", topic, event.event_id);
                    let sender = sender.clone();
                    tokio::spawn(async move {
                        let _ = sender.send(delivery).await;
                    });
                    delivered += 1;
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        if delivered < senders.len() {
            if let Some(mut live) = self.topics.get_mut(&topic) {
                live.retain(|s| !s.is_closed());
            }
        }

        if delivered == 0 {
            return Err(BusError::TopicClosed(topic.to_string()));
        }
        Ok(delivered)
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: WorkflowEvent) -> EngineResult<()> {
        self.send(event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approvalflow_protocols::{EventKind, WorkflowInstance};

    fn event(kind: EventKind) -> WorkflowEvent {
        let instance = WorkflowInstance::new("fruit", "Fruit", "FRUIT", "1", "alice");
        WorkflowEvent::for_instance(kind, &instance, "alice", "test")
    }

    #[tokio::test]
    async fn test_routes_by_topic() {
        let bus = EventBus::with_capacity(8);
        let mut workflow = bus.subscribe(Topic::WorkflowEvents);
        let mut approvals = bus.subscribe(Topic::ApprovalEvents);

        assert_eq!(bus.send(event(EventKind::WorkflowStarted)).await.unwrap(), 1);
        assert_eq!(bus.send(event(EventKind::ApprovalGranted)).await.unwrap(), 1);

        let delivery = workflow.recv().await.unwrap();
        assert_eq!(delivery.event.kind, EventKind::WorkflowStarted);
        assert_eq!(delivery.attempt, 1);
        assert_eq!(approvals.recv().await.unwrap().event.kind, EventKind::ApprovalGranted);
        assert_eq!(bus.published(), 2);
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscription() {
        let bus = EventBus::with_capacity(8);
        let mut a = bus.subscribe(Topic::TaskEvents);
        let mut b = bus.subscribe(Topic::TaskEvents);

        assert_eq!(bus.send(event(EventKind::TaskCreated)).await.unwrap(), 2);
        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_no_subscribers_is_not_an_error() {
        let bus = EventBus::with_capacity(8);
        assert_eq!(bus.send(event(EventKind::StepCompleted)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_pruned() {
        let bus = EventBus::with_capacity(8);
        let dropped = bus.subscribe(Topic::WorkflowEvents);
        drop(dropped);

        let err = bus.send(event(EventKind::WorkflowCompleted)).await.unwrap_err();
        assert!(matches!(err, BusError::TopicClosed(_)));
        assert_eq!(bus.subscriber_count(Topic::WorkflowEvents), 0);

        let _live = bus.subscribe(Topic::WorkflowEvents);
        bus.publish(event(EventKind::WorkflowCompleted)).await.unwrap();
    }

    #[tokio::test]
    async fn test_requeue_increments_attempt() {
        let bus = EventBus::with_capacity(8);
        let mut subscription = bus.subscribe(Topic::WorkflowEvents);
        bus.send(event(EventKind::WorkflowStarted)).await.unwrap();

        let first = subscription.recv().await.unwrap();
        subscription.requeue(first.next_attempt()).await.unwrap();
        assert_eq!(subscription.recv().await.unwrap().attempt, 2);
    }
}
