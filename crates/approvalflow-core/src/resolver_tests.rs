use super::*;
use approvalflow_protocols::{CompletionStrategy, ParallelGroupDefinition, StepDefinition};
use chrono::Duration;

fn task(instance_id: Uuid, step: u32, user: &str) -> Task {
    Task::new(instance_id, step, format!("Step {step}"), user, Duration::days(7))
}

fn sequential() -> WorkflowDefinition {
    WorkflowDefinition::new("Fruit Approval Workflow", "FRUIT")
        .with_step(StepDefinition::new(1, "Finance Review", "FINANCE_ROLE"))
        .with_step(StepDefinition::new(2, "Quality Check", "QUALITY_ROLE"))
}

fn majority() -> WorkflowDefinition {
    WorkflowDefinition::new("Review", "DOC")
        .with_step(StepDefinition::new(1, "Legal", "LEGAL").in_group("reviews"))
        .with_step(StepDefinition::new(2, "Security", "SECURITY").in_group("reviews"))
        .with_step(StepDefinition::new(3, "Privacy", "PRIVACY").in_group("reviews"))
        .with_step(StepDefinition::new(4, "Sign-off", "MANAGER"))
        .with_group(ParallelGroupDefinition::new("reviews", CompletionStrategy::Majority))
}

#[test]
fn test_no_parents_is_ready() {
    let instance_id = Uuid::new_v4();
    let a = task(instance_id, 1, "alice");
    let id = a.id;
    let snapshot = InstanceSnapshot::new(&sequential(), vec![a], Vec::new());
    assert_eq!(snapshot.readiness(id), Readiness::Ready);
}

#[test]
fn test_pending_parent_blocks() {
    let instance_id = Uuid::new_v4();
    let a = task(instance_id, 1, "alice").with_status(TaskStatus::Ready);
    let b = task(instance_id, 2, "bob");
    let dep = TaskDependency::sequential(instance_id, a.id, b.id);
    let b_id = b.id;

    let snapshot = InstanceSnapshot::new(&sequential(), vec![a, b], vec![dep]);
    assert_eq!(snapshot.readiness(b_id), Readiness::Blocked);
}

#[test]
fn test_rejected_parent_blocks() {
    let instance_id = Uuid::new_v4();
    let a = task(instance_id, 1, "alice").with_status(TaskStatus::Rejected);
    let b = task(instance_id, 2, "bob");
    let dep = TaskDependency::sequential(instance_id, a.id, b.id);
    let b_id = b.id;

    let snapshot = InstanceSnapshot::new(&sequential(), vec![a, b], vec![dep]);
    assert_eq!(snapshot.readiness(b_id), Readiness::Blocked);
    assert_eq!(snapshot.lowest_unsettled_step(), Some(1));
}

#[test]
fn test_replace_updates_readiness() {
    let instance_id = Uuid::new_v4();
    let mut a = task(instance_id, 1, "alice").with_status(TaskStatus::Ready);
    let b = task(instance_id, 2, "bob");
    let dep = TaskDependency::sequential(instance_id, a.id, b.id);
    let b_id = b.id;

    let mut snapshot = InstanceSnapshot::new(&sequential(), vec![a.clone(), b], vec![dep]);
    a.apply_status(TaskStatus::Approved, "alice");
    snapshot.replace(a);

    assert_eq!(snapshot.readiness(b_id), Readiness::Ready);
    assert_eq!(snapshot.lowest_unsettled_step(), Some(2));
}

#[test]
fn test_satisfied_group_releases_rejected_member() {
    let instance_id = Uuid::new_v4();
    let group = Some("reviews".to_string());
    let legal = task(instance_id, 1, "lee").with_group(group.clone()).with_status(TaskStatus::Completed);
    let security = task(instance_id, 2, "sam").with_group(group.clone()).with_status(TaskStatus::Rejected);
    let privacy = task(instance_id, 3, "pat").with_group(group).with_status(TaskStatus::Completed);
    let sign_off = task(instance_id, 4, "max");

    let deps = [legal.id, security.id, privacy.id]
        .iter()
        .map(|&p| TaskDependency::sequential(instance_id, p, sign_off.id))
        .collect();
    let sign_off_id = sign_off.id;

    let snapshot = InstanceSnapshot::new(&majority(), vec![legal, security, privacy, sign_off], deps);
    assert!(snapshot.is_group_satisfied("reviews"));
    assert_eq!(snapshot.readiness(sign_off_id), Readiness::Ready);
    assert_eq!(snapshot.group_task_ids("reviews").len(), 3);
}

#[test]
fn test_leftover_group_members_not_outstanding() {
    let instance_id = Uuid::new_v4();
    let group = Some("reviews".to_string());
    let legal = task(instance_id, 1, "lee").with_group(group.clone()).with_status(TaskStatus::Completed);
    let security = task(instance_id, 2, "sam").with_group(group.clone()).with_status(TaskStatus::Completed);
    let privacy = task(instance_id, 3, "pat").with_group(group).with_status(TaskStatus::Ready);

    let snapshot = InstanceSnapshot::new(&majority(), vec![legal, security, privacy], Vec::new());
    assert!(snapshot.open_tasks().is_empty());
    assert!(snapshot.all_succeeded());
}

#[test]
fn test_escalations_are_advisory() {
    let instance_id = Uuid::new_v4();
    let a = task(instance_id, 1, "alice").with_status(TaskStatus::Completed);
    let escalation = task(instance_id, 1, "boss").with_status(TaskStatus::Ready).as_escalation();

    let snapshot = InstanceSnapshot::new(&sequential(), vec![a, escalation], Vec::new());
    assert!(snapshot.open_tasks().is_empty());
    assert!(snapshot.all_succeeded());
}

#[test]
fn test_rejected_task_fails_instance() {
    let instance_id = Uuid::new_v4();
    let a = task(instance_id, 1, "alice").with_status(TaskStatus::Completed);
    let b = task(instance_id, 2, "bob").with_status(TaskStatus::Rejected);

    let snapshot = InstanceSnapshot::new(&sequential(), vec![a, b], Vec::new());
    assert!(snapshot.open_tasks().is_empty());
    assert!(!snapshot.all_succeeded());
}
