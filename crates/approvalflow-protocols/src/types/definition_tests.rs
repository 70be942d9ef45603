use super::*;

fn fruit_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("Fruit Approval Workflow", "FRUIT")
        .with_step(StepDefinition::new(1, "Finance Review", "FINANCE_ROLE"))
        .with_step(StepDefinition::new(2, "Quality Check", "QUALITY_ROLE"))
        .with_step(StepDefinition::new(3, "Manager Approval", "MANAGER_ROLE"))
}

#[test]
fn test_steps_ordered_skips_inactive() {
    let mut def = fruit_workflow();
    def.steps.reverse();
    def.steps[0].active = false;

    let orders: Vec<u32> = def.steps_ordered().iter().map(|s| s.order).collect();
    assert_eq!(orders, vec![1, 2]);
    assert_eq!(def.total_steps(), 2);
}

#[test]
fn test_accepts_entity_type() {
    let def = fruit_workflow();
    assert!(def.accepts_entity_type("FRUIT"));
    assert!(!def.accepts_entity_type("SELLER"));

    let any = WorkflowDefinition::new("Generic", ANY_ENTITY_TYPE);
    assert!(any.accepts_entity_type("SELLER"));
}

#[test]
fn test_group_membership_from_either_side() {
    let def = WorkflowDefinition::new("Review", "DOC")
        .with_step(StepDefinition::new(1, "Legal", "LEGAL").in_group("reviews"))
        .with_step(StepDefinition::new(2, "Security", "SECURITY"))
        .with_step(StepDefinition::new(3, "Sign-off", "MANAGER"))
        .with_group(
            ParallelGroupDefinition::new("reviews", CompletionStrategy::Majority)
                .with_steps(vec![2]),
        );

    assert_eq!(def.group_members("reviews"), vec![1, 2]);
    assert_eq!(def.group_for_step(2).unwrap().name, "reviews");
    assert!(def.group_for_step(3).is_none());
}

#[test]
fn test_active_conditions_sorted_by_priority() {
    let step = StepDefinition::new(1, "Finance Review", "FINANCE_ROLE")
        .with_condition(ConditionDefinition::new("low", "entityType=FRUIT", 1))
        .with_condition(ConditionDefinition::new("high", "userRole=ADMIN", 10));

    let names: Vec<&str> = step.active_conditions().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["high", "low"]);
}

#[test]
fn test_normalize_fills_ids() {
    let mut def = fruit_workflow()
        .with_timeout(TimeoutDefinition::new(1, 24, TimeoutAction::AutoApprove));
    def.id.clear();
    def.normalize();

    assert_eq!(def.id, "Fruit Approval Workflow");
    assert_eq!(def.timeouts[0].id, "Fruit Approval Workflow:1:0");
}

#[test]
fn test_implicit_notify_timeout_from_step_hours() {
    let def = WorkflowDefinition::new("Simple", "GENERIC")
        .with_step(StepDefinition::new(1, "Manager Approval", "MANAGER_ROLE").with_timeout_hours(48));

    let timeouts = def.active_timeouts(1);
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].duration_hours, 48);
    assert!(matches!(timeouts[0].action, TimeoutAction::Notify { message: None }));
}

#[test]
fn test_explicit_timeout_replaces_implicit() {
    let def = WorkflowDefinition::new("Simple", "GENERIC")
        .with_step(StepDefinition::new(1, "Manager Approval", "MANAGER_ROLE").with_timeout_hours(48))
        .with_timeout(TimeoutDefinition::new(1, 12, TimeoutAction::AutoReject));

    let timeouts = def.active_timeouts(1);
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].action, TimeoutAction::AutoReject);
}

#[test]
fn test_definition_from_toml() {
    let content = r#"
        name = "Seller Onboarding Workflow"
        entity_type = "SELLER"

        [[steps]]
        order = 1
        name = "Document Review"
        assigned_role = "BACKOFFICE_ROLE"
        group = "checks"

        [[steps]]
        order = 2
        name = "Risk Review"
        assigned_role = "RISK_ROLE"
        group = "checks"

        [[steps.conditions]]
        name = "sellers only"
        expression = "entityType=SELLER"
        priority = 5

        [[steps]]
        order = 3
        name = "Manager Approval"
        assigned_role = "MANAGER_ROLE"

        [[groups]]
        name = "checks"
        strategy = { custom = 1 }

        [[timeouts]]
        step = 3
        duration_hours = 24
        action = { type = "escalate", role = "ADMIN" }
    "#;

    let def: WorkflowDefinition = toml::from_str(content).unwrap();
    assert!(def.active);
    assert_eq!(def.steps.len(), 3);
    assert_eq!(def.steps[0].step_type, "APPROVAL");
    assert_eq!(def.steps[1].conditions[0].priority, 5);
    assert_eq!(def.groups[0].strategy, CompletionStrategy::Custom(1));
    assert_eq!(
        def.timeouts[0].action,
        TimeoutAction::Escalate { role: "ADMIN".to_string() }
    );
}

#[test]
fn test_strategy_display() {
    assert_eq!(CompletionStrategy::Majority.to_string(), "MAJORITY");
    assert_eq!(CompletionStrategy::Custom(2).to_string(), "CUSTOM(2)");
}
