//! Workflow definition lookup.

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::types::{
    ConditionDefinition, ParallelGroupDefinition, StepDefinition, TimeoutDefinition,
    WorkflowDefinition,
};

/// Read-only access to workflow definitions.
///
/// Implementors supply whole definitions; the narrower lookups are derived
/// from them.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Look up a workflow by its unique name.
    async fn get_workflow_by_name(&self, name: &str) -> EngineResult<Option<WorkflowDefinition>>;

    /// Look up a workflow by id.
    async fn get_workflow(&self, workflow_id: &str) -> EngineResult<Option<WorkflowDefinition>>;

    /// All known workflows.
    async fn list_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>>;

    /// Active steps of a workflow, sorted by order.
    async fn get_steps_ordered(&self, workflow_id: &str) -> EngineResult<Vec<StepDefinition>> {
        let def = self.require(workflow_id).await?;
        Ok(def.steps_ordered().into_iter().cloned().collect())
    }

    /// Active conditions of a step, highest priority first.
    async fn get_active_conditions(
        &self,
        workflow_id: &str,
        step_order: u32,
    ) -> EngineResult<Vec<ConditionDefinition>> {
        let def = self.require(workflow_id).await?;
        Ok(def
            .step(step_order)
            .map(|s| s.active_conditions().into_iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Active parallel groups of a workflow, sorted by order.
    async fn get_active_groups(
        &self,
        workflow_id: &str,
    ) -> EngineResult<Vec<ParallelGroupDefinition>> {
        let def = self.require(workflow_id).await?;
        Ok(def.active_groups().into_iter().cloned().collect())
    }

    /// Active timeouts of a step.
    async fn get_active_timeouts(
        &self,
        workflow_id: &str,
        step_order: u32,
    ) -> EngineResult<Vec<TimeoutDefinition>> {
        let def = self.require(workflow_id).await?;
        Ok(def.active_timeouts(step_order))
    }

    /// Look up a workflow by id, failing when absent.
    async fn require(&self, workflow_id: &str) -> EngineResult<WorkflowDefinition> {
        self.get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))
    }
}
