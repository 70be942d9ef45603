use super::*;
use approvalflow_protocols::{
    ParallelGroupDefinition, StepDefinition, TimeoutDefinition, UserRef,
};
use async_trait::async_trait;

fn fruit() -> WorkflowDefinition {
    WorkflowDefinition::new("Fruit Approval Workflow", "FRUIT")
        .with_step(StepDefinition::new(1, "Finance Review", "FINANCE_ROLE"))
        .with_step(StepDefinition::new(2, "Quality Check", "QUALITY_ROLE"))
        .with_step(StepDefinition::new(3, "Manager Approval", "MANAGER_ROLE"))
}

fn assert_configuration(result: EngineResult<DefinitionReport>) {
    assert!(matches!(result, Err(EngineError::Configuration(_))), "got {:?}", result);
}

#[test]
fn test_valid_workflow() {
    let report = validate_definition(&fruit()).unwrap();
    assert!(report.is_clean());
}

#[test]
fn test_no_steps() {
    assert_configuration(validate_definition(&WorkflowDefinition::new("Empty", "FRUIT")));
}

#[test]
fn test_missing_role() {
    let def = WorkflowDefinition::new("W", "FRUIT").with_step(StepDefinition::new(1, "Review", ""));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_step_orders_must_be_dense() {
    let gap = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R"))
        .with_step(StepDefinition::new(3, "C", "R"));
    assert_configuration(validate_definition(&gap));

    let duplicate = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R"))
        .with_step(StepDefinition::new(1, "B", "R"));
    assert_configuration(validate_definition(&duplicate));
}

#[test]
fn test_unknown_group() {
    let def = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R").in_group("missing"));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_custom_zero() {
    let def = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R").in_group("g"))
        .with_step(StepDefinition::new(2, "B", "R").in_group("g"))
        .with_group(ParallelGroupDefinition::new("g", CompletionStrategy::Custom(0)));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_two_step_cycle() {
    let def = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R").with_depends_on(vec![2]))
        .with_step(StepDefinition::new(2, "B", "R").with_depends_on(vec![1]));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_self_dependency() {
    let def = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R").with_depends_on(vec![1]));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_unknown_dependency() {
    let def = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R").with_depends_on(vec![9]));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_timeout_on_unknown_step() {
    let def = fruit().with_timeout(TimeoutDefinition::new(7, 24, TimeoutAction::AutoApprove));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_escalation_needs_role() {
    let def = fruit().with_timeout(TimeoutDefinition::new(
        1,
        24,
        TimeoutAction::Escalate {
            role: String::new(),
        },
    ));
    assert_configuration(validate_definition(&def));
}

#[test]
fn test_shape_warnings() {
    let def = WorkflowDefinition::new("W", "FRUIT")
        .with_step(StepDefinition::new(1, "A", "R").in_group("solo"))
        .with_step({
            let mut step = StepDefinition::new(2, "B", "R");
            step.parallel = true;
            step
        })
        .with_group(ParallelGroupDefinition::new("solo", CompletionStrategy::Custom(3)));

    let report = validate_definition(&def).unwrap();
    assert!(report.warnings.iter().any(|w| w.contains("single step")));
    assert!(report.warnings.iter().any(|w| w.contains("requires 3")));
    assert!(report.warnings.iter().any(|w| w.contains("marked parallel")));
}

struct OnlyFinance;

#[async_trait]
impl UserDirectory for OnlyFinance {
    async fn find_users_by_role(&self, role: &str) -> EngineResult<Vec<UserRef>> {
        Ok(match role {
            "FINANCE_ROLE" => vec![UserRef::new("fin")],
            _ => Vec::new(),
        })
    }
}

#[tokio::test]
async fn test_roles_without_users_warn() {
    let report = validate_with_directory(&fruit(), &OnlyFinance).await.unwrap();
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings[0].contains("QUALITY_ROLE"));
}
