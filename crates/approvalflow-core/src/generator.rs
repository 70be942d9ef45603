//! Task generation.
//!
//! One task is created per (step, user holding the step's role). Steps are
//! then wired into stages: every member of a parallel group shares the stage
//! of the group's first member, and every other step is a stage of its own.
//! By default a stage depends on the whole previous stage; a step with
//! `depends_on` depends on exactly the listed steps instead. Step edges are
//! expanded to every (parent task, dependent task) pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use approvalflow_config::EngineConfig;
use approvalflow_protocols::{
    EngineResult, StepDefinition, Task, TaskDependency, UserDirectory, WorkflowDefinition,
    WorkflowInstance,
};

use crate::graph::{DependencyGraph, GraphError};

/// Tasks and edges produced for one instance.
#[derive(Debug, Clone, Default)]
pub struct GeneratedTasks {
    pub tasks: Vec<Task>,
    pub dependencies: Vec<TaskDependency>,
    /// Active steps skipped because their role had no users.
    pub skipped_steps: Vec<u32>,
}

impl GeneratedTasks {
    /// Whether `task_id` has no incoming edge.
    pub fn is_root(&self, task_id: Uuid) -> bool {
        !self.dependencies.iter().any(|d| d.dependent == task_id)
    }

    /// Lowest step order that produced a task.
    pub fn first_step(&self) -> Option<u32> {
        self.tasks.iter().map(|t| t.step_order).min()
    }
}

/// Materializes tasks and dependency edges for active steps.
pub struct TaskGenerator {
    directory: Arc<dyn UserDirectory>,
    due_in: Duration,
}

impl TaskGenerator {
    pub fn new(directory: Arc<dyn UserDirectory>, config: &EngineConfig) -> Self {
        Self {
            directory,
            due_in: Duration::days(i64::from(config.default_due_days)),
        }
    }

    /// Generate tasks for `steps` of `definition` on behalf of `instance`.
    pub async fn generate(
        &self,
        instance: &WorkflowInstance,
        definition: &WorkflowDefinition,
        steps: &[&StepDefinition],
    ) -> EngineResult<GeneratedTasks> {
        let mut generated = GeneratedTasks::default();
        let mut tasks_by_step: HashMap<u32, Vec<Uuid>> = HashMap::new();
        let mut present: Vec<&StepDefinition> = Vec::new();

        for step in steps {
            let users = self.directory.find_users_by_role(&step.assigned_role).await?;
            if users.is_empty() {
                warn!(
                    "No users found with role '{}' for step {} '{}' of instance {}, skipping step",
                    step.assigned_role, step.order, step.name, instance.id
                );
                generated.skipped_steps.push(step.order);
                continue;
            }

            let group = definition.group_for_step(step.order).map(|g| g.name.clone());
            for user in users {
                let mut task = Task::new(
                    instance.id,
                    step.order,
                    &step.name,
                    &user.username,
                    self.due_in,
                )
                .with_group(group.clone());
                if let Some(description) = &step.description {
                    task = task.with_description(description);
                }
                tasks_by_step.entry(step.order).or_default().push(task.id);
                generated.tasks.push(task);
            }
            present.push(step);
        }

        let step_graph = plan_step_graph(definition, &present)?;

        let mut task_graph: DependencyGraph<Uuid> = DependencyGraph::new();
        for task in &generated.tasks {
            task_graph.add_node(task.id);
        }
        for (parent_step, dependent_step) in step_graph.edges() {
            let parents = tasks_by_step.get(&parent_step).cloned().unwrap_or_default();
            let dependents = tasks_by_step.get(&dependent_step).cloned().unwrap_or_default();
            for &parent in &parents {
                for &dependent in &dependents {
                    task_graph.add_edge(parent, dependent)?;
                }
            }
        }

        generated.dependencies = task_graph
            .edges()
            .map(|(parent, dependent)| TaskDependency::sequential(instance.id, parent, dependent))
            .collect();

        debug!(
            "Generated {} tasks and {} dependencies for instance {}",
            generated.tasks.len(),
            generated.dependencies.len(),
            instance.id
        );
        Ok(generated)
    }
}

/// Step-level dependency graph for `steps` of `definition`.
///
/// Explicit dependencies on steps outside `steps` are dropped.
pub fn plan_step_graph(
    definition: &WorkflowDefinition,
    steps: &[&StepDefinition],
) -> Result<DependencyGraph<u32>, GraphError> {
    let mut ordered: Vec<&StepDefinition> = steps.to_vec();
    ordered.sort_by_key(|s| s.order);

    let mut graph = DependencyGraph::new();
    for step in &ordered {
        graph.add_node(step.order);
    }
    let present: HashSet<u32> = ordered.iter().map(|s| s.order).collect();

    let mut stages: Vec<Vec<u32>> = Vec::new();
    let mut group_stage: HashMap<&str, usize> = HashMap::new();
    for step in &ordered {
        match definition.group_for_step(step.order) {
            Some(group) => match group_stage.get(group.name.as_str()) {
                Some(&index) => stages[index].push(step.order),
                None => {
                    group_stage.insert(group.name.as_str(), stages.len());
                    stages.push(vec![step.order]);
                }
            },
            None => stages.push(vec![step.order]),
        }
    }

    for (index, stage) in stages.iter().enumerate() {
        for &order in stage {
            let explicit = definition.step(order).and_then(|s| s.depends_on.as_ref());
            let parents: Vec<u32> = match explicit {
                Some(listed) => listed.iter().copied().filter(|p| present.contains(p)).collect(),
                None if index > 0 => stages[index - 1].clone(),
                None => Vec::new(),
            };
            for parent in parents {
                graph.add_edge(parent, order)?;
            }
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approvalflow_protocols::{
        CompletionStrategy, EngineError, ParallelGroupDefinition, TaskStatus, UserRef,
    };
    use async_trait::async_trait;

    struct Roles(HashMap<&'static str, Vec<&'static str>>);

    #[async_trait]
    impl UserDirectory for Roles {
        async fn find_users_by_role(&self, role: &str) -> EngineResult<Vec<UserRef>> {
            Ok(self
                .0
                .get(role)
                .map(|users| users.iter().map(|u| UserRef::new(*u)).collect())
                .unwrap_or_default())
        }
    }

    fn generator(roles: &[(&'static str, Vec<&'static str>)]) -> TaskGenerator {
        let directory = Arc::new(Roles(roles.iter().cloned().collect()));
        TaskGenerator::new(directory, &EngineConfig::default())
    }

    fn instance(def: &WorkflowDefinition) -> WorkflowInstance {
        WorkflowInstance::new(&def.id, &def.name, "FRUIT", "1", "alice")
    }

    fn tasks_of(generated: &GeneratedTasks, step: u32) -> Vec<Uuid> {
        generated
            .tasks
            .iter()
            .filter(|t| t.step_order == step)
            .map(|t| t.id)
            .collect()
    }

    fn edge_exists(generated: &GeneratedTasks, parent: Uuid, dependent: Uuid) -> bool {
        generated
            .dependencies
            .iter()
            .any(|d| d.parent == parent && d.dependent == dependent)
    }

    #[tokio::test]
    async fn test_one_task_per_user_with_defaults() {
        let def = WorkflowDefinition::new("Fruit Approval Workflow", "FRUIT")
            .with_step(StepDefinition::new(1, "Finance Review", "FINANCE_ROLE"));
        let generator = generator(&[("FINANCE_ROLE", vec!["fin1", "fin2"])]);
        let inst = instance(&def);

        let generated = generator.generate(&inst, &def, &def.steps_ordered()).await.unwrap();
        assert_eq!(generated.tasks.len(), 2);
        for task in &generated.tasks {
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.priority, approvalflow_protocols::TaskPriority::Medium);
            let days = (task.due_date - task.created_at).num_days();
            assert_eq!(days, 7);
        }
        assert!(generated.dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_chaining_is_dense() {
        let def = WorkflowDefinition::new("Fruit Approval Workflow", "FRUIT")
            .with_step(StepDefinition::new(1, "Finance Review", "FINANCE_ROLE"))
            .with_step(StepDefinition::new(2, "Quality Check", "QUALITY_ROLE"));
        let generator = generator(&[
            ("FINANCE_ROLE", vec!["fin1", "fin2"]),
            ("QUALITY_ROLE", vec!["qa1", "qa2", "qa3"]),
        ]);
        let inst = instance(&def);

        let generated = generator.generate(&inst, &def, &def.steps_ordered()).await.unwrap();
        assert_eq!(generated.dependencies.len(), 6);
        for parent in tasks_of(&generated, 1) {
            for dependent in tasks_of(&generated, 2) {
                assert!(edge_exists(&generated, parent, dependent));
            }
        }
    }

    #[tokio::test]
    async fn test_group_members_share_a_stage() {
        let def = WorkflowDefinition::new("Review", "DOC")
            .with_step(StepDefinition::new(1, "Intake", "CLERK"))
            .with_step(StepDefinition::new(2, "Legal", "LEGAL").in_group("reviews"))
            .with_step(StepDefinition::new(3, "Security", "SECURITY").in_group("reviews"))
            .with_step(StepDefinition::new(4, "Sign-off", "MANAGER"))
            .with_group(ParallelGroupDefinition::new("reviews", CompletionStrategy::AllComplete));
        let generator = generator(&[
            ("CLERK", vec!["clerk"]),
            ("LEGAL", vec!["lee"]),
            ("SECURITY", vec!["sam"]),
            ("MANAGER", vec!["max"]),
        ]);
        let inst = instance(&def);

        let generated = generator.generate(&inst, &def, &def.steps_ordered()).await.unwrap();
        let intake = tasks_of(&generated, 1)[0];
        let legal = tasks_of(&generated, 2)[0];
        let security = tasks_of(&generated, 3)[0];
        let sign_off = tasks_of(&generated, 4)[0];

        assert!(edge_exists(&generated, intake, legal));
        assert!(edge_exists(&generated, intake, security));
        assert!(!edge_exists(&generated, legal, security));
        assert!(edge_exists(&generated, legal, sign_off));
        assert!(edge_exists(&generated, security, sign_off));
        assert_eq!(generated.dependencies.len(), 4);

        let group = generated.tasks.iter().find(|t| t.id == legal).unwrap().group.clone();
        assert_eq!(group.as_deref(), Some("reviews"));
    }

    #[tokio::test]
    async fn test_role_without_users_skips_step() {
        let def = WorkflowDefinition::new("Fruit Approval Workflow", "FRUIT")
            .with_step(StepDefinition::new(1, "Finance Review", "FINANCE_ROLE"))
            .with_step(StepDefinition::new(2, "Quality Check", "QUALITY_ROLE"))
            .with_step(StepDefinition::new(3, "Manager Approval", "MANAGER_ROLE"));
        let generator = generator(&[("FINANCE_ROLE", vec!["fin"]), ("MANAGER_ROLE", vec!["boss"])]);
        let inst = instance(&def);

        let generated = generator.generate(&inst, &def, &def.steps_ordered()).await.unwrap();
        assert_eq!(generated.skipped_steps, vec![2]);
        assert_eq!(generated.tasks.len(), 2);

        let finance = tasks_of(&generated, 1)[0];
        let manager = tasks_of(&generated, 3)[0];
        assert!(edge_exists(&generated, finance, manager));
    }

    #[tokio::test]
    async fn test_explicit_depends_on_replaces_chaining() {
        let def = WorkflowDefinition::new("Fan", "DOC")
            .with_step(StepDefinition::new(1, "Draft", "WRITER"))
            .with_step(StepDefinition::new(2, "Edit", "EDITOR"))
            .with_step(StepDefinition::new(3, "Publish", "PUBLISHER").with_depends_on(vec![1]));
        let generator = generator(&[
            ("WRITER", vec!["w"]),
            ("EDITOR", vec!["e"]),
            ("PUBLISHER", vec!["p"]),
        ]);
        let inst = instance(&def);

        let generated = generator.generate(&inst, &def, &def.steps_ordered()).await.unwrap();
        let draft = tasks_of(&generated, 1)[0];
        let edit = tasks_of(&generated, 2)[0];
        let publish = tasks_of(&generated, 3)[0];

        assert!(edge_exists(&generated, draft, edit));
        assert!(edge_exists(&generated, draft, publish));
        assert!(!edge_exists(&generated, edit, publish));
    }

    #[tokio::test]
    async fn test_cyclic_steps_rejected() {
        let def = WorkflowDefinition::new("Loop", "DOC")
            .with_step(StepDefinition::new(1, "A", "ROLE").with_depends_on(vec![2]))
            .with_step(StepDefinition::new(2, "B", "ROLE"));
        let generator = generator(&[("ROLE", vec!["u"])]);
        let inst = instance(&def);

        let err = generator.generate(&inst, &def, &def.steps_ordered()).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
