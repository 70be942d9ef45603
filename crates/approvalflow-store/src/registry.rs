//! Definition registry.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use approvalflow_protocols::{DefinitionStore, EngineResult, WorkflowDefinition};

/// In-process [`DefinitionStore`] keyed by workflow id.
#[derive(Default)]
pub struct DefinitionRegistry {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from loaded definitions.
    pub fn from_definitions(definitions: impl IntoIterator<Item = WorkflowDefinition>) -> Self {
        let registry = Self::new();
        for definition in definitions {
            registry.register(definition);
        }
        registry
    }

    /// Register or replace a definition.
    pub fn register(&self, mut definition: WorkflowDefinition) {
        definition.normalize();
        let mut workflows = self.workflows.write();

        if let Some(clash) = workflows
            .values()
            .find(|w| w.name == definition.name && w.id != definition.id)
        {
            warn!(
                "Workflow name '{}' is used by '{}' and '{}'; lookups by name return either",
                definition.name, clash.id, definition.id
            );
        }
        info!(
            "Registered workflow '{}' ({} steps)",
            definition.name,
            definition.steps.len()
        );
        workflows.insert(definition.id.clone(), definition);
    }

    /// Remove a definition by id.
    pub fn unregister(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.workflows.write().remove(workflow_id)
    }

    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }
}

#[async_trait]
impl DefinitionStore for DefinitionRegistry {
    async fn get_workflow_by_name(&self, name: &str) -> EngineResult<Option<WorkflowDefinition>> {
        Ok(self
            .workflows
            .read()
            .values()
            .find(|w| w.name == name)
            .cloned())
    }

    async fn get_workflow(&self, workflow_id: &str) -> EngineResult<Option<WorkflowDefinition>> {
        Ok(self.workflows.read().get(workflow_id).cloned())
    }

    async fn list_workflows(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        let mut workflows: Vec<WorkflowDefinition> =
            self.workflows.read().values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }
}
