//! Integration tests for the event bus and the cascade subscriber.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use approvalflow_config::{EngineConfig, EventsConfig};
use approvalflow_core::{Collaborators, WorkflowEngine};
use approvalflow_events::{
    BusError, CascadeHandler, EventBus, EventHandler, EventSubscriber, SubscriberStats,
};
use approvalflow_protocols::{
    Context, EngineResult, EventKind, InstanceStatus, Notifier, StepDefinition, TaskStatus,
    Topic, WorkflowDefinition, WorkflowEvent, WorkflowInstance,
};
use approvalflow_store::{DefinitionRegistry, MemoryStore, StaticUserDirectory};

// ============================================================================
// Test Helpers
// ============================================================================

fn events_config(max_redeliveries: u32) -> EventsConfig {
    EventsConfig {
        max_redeliveries,
        redelivery_delay_ms: 5,
        topic_capacity: 64,
    }
}

/// Counts events of one kind.
struct KindCounter {
    kind: EventKind,
    seen: Arc<AtomicU32>,
}

impl KindCounter {
    fn new(kind: EventKind) -> (Self, Arc<AtomicU32>) {
        let seen = Arc::new(AtomicU32::new(0));
        (
            Self {
                kind,
                seen: seen.clone(),
            },
            seen,
        )
    }
}

#[async_trait]
impl EventHandler for KindCounter {
    fn name(&self) -> &str {
        "kind-counter"
    }

    async fn handle(&self, event: &WorkflowEvent) -> Result<(), BusError> {
        if event.kind == self.kind {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Fails the first `failures` calls.
struct FlakyHandler {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyHandler {
    fn new(failures: u32) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                failures,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, _event: &WorkflowEvent) -> Result<(), BusError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(BusError::handler(self.name(), "temporarily unavailable"));
        }
        Ok(())
    }
}

struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify_user(&self, _: &str, _: &str, _: &str, _: &str) -> EngineResult<()> {
        Ok(())
    }
}

fn fruit_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("Fruit Approval Workflow", "FRUIT")
        .with_step(StepDefinition::new(1, "Finance Review", "FINANCE_ROLE"))
        .with_step(StepDefinition::new(2, "Quality Check", "QUALITY_ROLE"))
}

fn engine_on(bus: Arc<EventBus>) -> Arc<WorkflowEngine> {
    let store = Arc::new(MemoryStore::new());
    let directory = StaticUserDirectory::new()
        .with_user("fiona", &["FINANCE_ROLE"])
        .with_user("quinn", &["QUALITY_ROLE"]);
    Arc::new(WorkflowEngine::new(
        EngineConfig::default(),
        Collaborators {
            definitions: Arc::new(DefinitionRegistry::from_definitions([fruit_workflow()])),
            directory: Arc::new(directory),
            tasks: store.clone(),
            instances: store,
            publisher: bus,
            notifier: Arc::new(SilentNotifier),
        },
    ))
}

fn spawn_subscriber(
    bus: &EventBus,
    topic: Topic,
    handler: Arc<dyn EventHandler>,
    config: &EventsConfig,
    shutdown_tx: &broadcast::Sender<()>,
) -> (tokio::task::JoinHandle<()>, Arc<SubscriberStats>) {
    let subscriber = EventSubscriber::new(bus.subscribe(topic), handler, config);
    let stats = subscriber.stats();
    let handle = tokio::spawn(subscriber.run(shutdown_tx.subscribe()));
    (handle, stats)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn task_event(kind: EventKind) -> WorkflowEvent {
    let instance = WorkflowInstance::new("fruit", "Fruit", "FRUIT", "1", "alice");
    WorkflowEvent::for_instance(kind, &instance, "alice", "test")
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_redelivery_after_handler_failure() {
    let bus = EventBus::with_capacity(16);
    let config = events_config(3);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (handler, calls) = FlakyHandler::new(2);
    let (handle, stats) = spawn_subscriber(&bus, Topic::TaskEvents, Arc::new(handler), &config, &shutdown_tx);

    bus.send(task_event(EventKind::TaskCreated)).await.unwrap();

    wait_until(|| stats.processed() == 1).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.redelivered(), 2);
    assert!(stats.dead_letters().is_empty());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_exhausted_delivery_dead_lettered() {
    let bus = EventBus::with_capacity(16);
    let config = events_config(2);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (handler, calls) = FlakyHandler::new(u32::MAX);
    let (handle, stats) = spawn_subscriber(&bus, Topic::TaskEvents, Arc::new(handler), &config, &shutdown_tx);

    bus.send(task_event(EventKind::TaskAssigned)).await.unwrap();

    wait_until(|| !stats.dead_letters().is_empty()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.dead_letters()[0].attempt, 3);
    assert_eq!(stats.processed(), 0);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_subscriber_exits_when_bus_dropped() {
    let bus = EventBus::with_capacity(4);
    let (handler, _) = KindCounter::new(EventKind::WorkflowStarted);
    let subscriber = EventSubscriber::new(bus.subscribe(Topic::WorkflowEvents), Arc::new(handler), &events_config(0));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handle = tokio::spawn(subscriber.run(shutdown_tx.subscribe()));

    drop(bus);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

// ============================================================================
// Cascade Subscriber
// ============================================================================

#[tokio::test]
async fn test_event_path_and_direct_path_complete_once() {
    let bus = Arc::new(EventBus::new(&events_config(3)));
    let engine = engine_on(bus.clone());
    let config = events_config(3);
    let (shutdown_tx, _) = broadcast::channel(1);

    let (cascade_handle, cascade_stats) = spawn_subscriber(
        &bus,
        Topic::TaskEvents,
        Arc::new(CascadeHandler::new(&engine)),
        &config,
        &shutdown_tx,
    );
    let (counter, completed) = KindCounter::new(EventKind::WorkflowCompleted);
    let (counter_handle, _) = spawn_subscriber(&bus, Topic::WorkflowEvents, Arc::new(counter), &config, &shutdown_tx);

    let instance = engine
        .start_workflow("FRUIT", "apple", "Fruit Approval Workflow", "alice", Context::new())
        .await
        .unwrap();

    for step in 1..=2 {
        let task = engine
            .list_instance_tasks(instance.id)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.step_order == step)
            .unwrap();
        engine
            .report_task_terminal(task.id, TaskStatus::Completed, None, &task.assigned_to)
            .await
            .unwrap();
    }

    wait_until(|| completed.load(Ordering::SeqCst) >= 1).await;
    // Two creations and two completions, all acknowledged.
    wait_until(|| cascade_stats.processed() == 4).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert!(cascade_stats.dead_letters().is_empty());
    let status = engine.get_workflow_status(instance.id).await.unwrap();
    assert_eq!(status.status, InstanceStatus::Completed);

    shutdown_tx.send(()).unwrap();
    cascade_handle.await.unwrap();
    counter_handle.await.unwrap();
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let bus = Arc::new(EventBus::with_capacity(64));
    let mut task_events = bus.subscribe(Topic::TaskEvents);
    let engine = engine_on(bus.clone());
    let handler = CascadeHandler::new(&engine);

    let instance = engine
        .start_workflow("FRUIT", "pear", "Fruit Approval Workflow", "alice", Context::new())
        .await
        .unwrap();
    let finance = engine
        .list_instance_tasks(instance.id)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.step_order == 1)
        .unwrap();
    engine
        .report_task_terminal(finance.id, TaskStatus::Completed, None, "fiona")
        .await
        .unwrap();

    let mut completion = None;
    while let Ok(Some(delivery)) =
        tokio::time::timeout(Duration::from_millis(50), task_events.recv()).await
    {
        if delivery.event.kind == EventKind::TaskCompleted {
            completion = Some(delivery.event);
        }
    }
    let completion = completion.unwrap();

    for _ in 0..3 {
        handler.handle(&completion).await.unwrap();
    }

    let tasks = engine.list_instance_tasks(instance.id).await.unwrap();
    let ready = tasks.iter().filter(|t| t.status == TaskStatus::Ready).count();
    assert_eq!(ready, 1);
    assert_eq!(
        engine.get_instance(instance.id).await.unwrap().current_step_order,
        2
    );
}

#[tokio::test]
async fn test_unknown_task_acknowledged() {
    let bus = Arc::new(EventBus::with_capacity(8));
    let engine = engine_on(bus);
    let handler = CascadeHandler::new(&engine);

    let mut event = task_event(EventKind::TaskCompleted);
    event.task_id = Some(uuid::Uuid::new_v4());
    handler.handle(&event).await.unwrap();

    // Non-terminal kinds are ignored outright.
    handler.handle(&task_event(EventKind::TaskCreated)).await.unwrap();
}
