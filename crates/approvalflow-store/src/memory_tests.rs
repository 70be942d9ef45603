use super::*;
use chrono::Duration;

fn instance(entity_id: &str) -> WorkflowInstance {
    WorkflowInstance::new("fruit", "Fruit Approval Workflow", "FRUIT", entity_id, "alice")
}

fn task(instance_id: Uuid, step: u32, user: &str) -> Task {
    Task::new(instance_id, step, "Review", user, Duration::days(7))
}

#[tokio::test]
async fn test_insert_and_get_task() {
    let store = MemoryStore::new();
    let t = task(Uuid::new_v4(), 1, "alice");
    store.insert_tasks(&[t.clone()]).await.unwrap();

    let loaded = store.get_task(t.id).await.unwrap().unwrap();
    assert_eq!(loaded.assigned_to, "alice");
    assert!(store.get_task(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transition_task_compares_status() {
    let store = MemoryStore::new();
    let t = task(Uuid::new_v4(), 1, "alice").with_status(TaskStatus::Ready);
    store.insert_tasks(&[t.clone()]).await.unwrap();

    let mut done = t.clone();
    done.apply_status(TaskStatus::Completed, "alice");
    assert!(store.transition_task(&done, TaskStatus::Ready).await.unwrap());

    // A second writer that observed READY loses.
    let mut rejected = t.clone();
    rejected.apply_status(TaskStatus::Rejected, "bob");
    assert!(!store.transition_task(&rejected, TaskStatus::Ready).await.unwrap());

    let stored = store.get_task(t.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_transition_unknown_task() {
    let store = MemoryStore::new();
    let t = task(Uuid::new_v4(), 1, "alice");
    let err = store.transition_task(&t, TaskStatus::Pending).await.unwrap_err();
    assert!(matches!(err, EngineError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_dependency_queries() {
    let store = MemoryStore::new();
    let instance_id = Uuid::new_v4();
    let a = task(instance_id, 1, "alice").with_status(TaskStatus::Completed);
    let b = task(instance_id, 2, "bob").with_status(TaskStatus::Blocked);
    let c = task(instance_id, 3, "carol").with_status(TaskStatus::Blocked);
    store.insert_tasks(&[a.clone(), b.clone(), c.clone()]).await.unwrap();
    store
        .insert_dependencies(&[
            TaskDependency::sequential(instance_id, a.id, b.id),
            TaskDependency::sequential(instance_id, b.id, c.id),
        ])
        .await
        .unwrap();

    assert_eq!(store.dependents_of(a.id).await.unwrap()[0].dependent, b.id);
    assert_eq!(store.parents_of(c.id).await.unwrap()[0].parent, b.id);
    assert_eq!(store.dependencies_for_instance(instance_id).await.unwrap().len(), 2);

    let ready: Vec<Uuid> = store.ready_tasks(instance_id).await.unwrap().iter().map(|t| t.id).collect();
    let blocked: Vec<Uuid> = store.blocked_tasks(instance_id).await.unwrap().iter().map(|t| t.id).collect();
    assert_eq!(ready, vec![b.id]);
    assert_eq!(blocked, vec![c.id]);
    assert_eq!(store.tasks_by_status(instance_id, TaskStatus::Blocked).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_insert_instance_rejects_duplicate_entity() {
    let store = MemoryStore::new();
    store.insert_instance(&instance("1")).await.unwrap();

    let err = store.insert_instance(&instance("1")).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists { .. }));

    store.insert_instance(&instance("2")).await.unwrap();
    assert_eq!(store.list_instances(None, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_terminal_instance_frees_entity() {
    let store = MemoryStore::new();
    let mut first = instance("1");
    store.insert_instance(&first).await.unwrap();

    first.status = InstanceStatus::Cancelled;
    assert!(store.transition_instance(&first, InstanceStatus::Pending).await.unwrap());
    assert!(store.find_active_for_entity("FRUIT", "1").await.unwrap().is_none());

    store.insert_instance(&instance("1")).await.unwrap();
    assert!(store.find_active_for_entity("FRUIT", "1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_inserts_admit_one() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.insert_instance(&instance("42")).await }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_list_instances_filters() {
    let store = MemoryStore::new();
    let mut done = instance("1");
    done.status = InstanceStatus::Completed;
    store.insert_instance(&done).await.unwrap();
    store.insert_instance(&instance("2")).await.unwrap();

    let pending = store.list_instances(Some("fruit"), Some(InstanceStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, "2");
    assert!(store.list_instances(Some("other"), None).await.unwrap().is_empty());
}
