//! Repository traits for the approval engine
//!
//! The engine owns no database. Callers implement these traits to
//! bind workflow templates and instances to whatever store the
//! platform uses; the in-memory implementations exist for tests.

use async_trait::async_trait;
use std::collections::HashMap;

use super::instance::{EntityRef, InstanceId, InstanceStatus, WorkflowId, WorkflowInstance};
use super::workflow::Workflow;
use crate::CoreError;

/// Repository for workflow templates
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Find a workflow by ID
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError>;

    /// Find active workflows for an entity type, optionally narrowed by name
    async fn find_active_for_entity_type(
        &self,
        entity_type: &str,
        name: Option<&str>,
    ) -> Result<Vec<Workflow>, CoreError>;

    /// Save a workflow
    async fn save(&self, workflow: &Workflow) -> Result<(), CoreError>;

    /// Delete a workflow
    async fn delete(&self, id: &WorkflowId) -> Result<(), CoreError>;

    /// List all workflow IDs
    async fn list_workflows(&self) -> Result<Vec<WorkflowId>, CoreError>;

    /// Get all workflows
    async fn find_all(&self) -> Result<Vec<Workflow>, CoreError>;
}

/// Repository for workflow instances
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Find a workflow instance by ID
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, CoreError>;

    /// Save a workflow instance
    ///
    /// Writes are version-gated: a first save must carry version 1,
    /// an update must carry exactly the stored version plus one.
    /// Anything else is a stale write and fails with `Conflict`.
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), CoreError>;

    /// Delete a workflow instance
    async fn delete(&self, id: &InstanceId) -> Result<(), CoreError>;

    /// Find all instances for an entity, oldest first
    async fn find_for_entity(&self, entity: &EntityRef)
        -> Result<Vec<WorkflowInstance>, CoreError>;

    /// Find all instance IDs for a workflow template
    async fn find_all_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<InstanceId>, CoreError>;

    /// List instances with optional filters
    async fn list_instances(
        &self,
        workflow_id: Option<&WorkflowId>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::RwLock;

    /// In-memory instance repository backed by concurrent maps to
    /// keep lock contention out of parallel tests
    pub struct MemoryInstanceRepository {
        instances: std::sync::Arc<DashMap<String, WorkflowInstance>>,
        by_entity: std::sync::Arc<DashMap<String, Vec<String>>>,
        by_workflow: std::sync::Arc<DashMap<String, Vec<String>>>,
    }

    impl MemoryInstanceRepository {
        /// Create a new memory instance repository
        pub fn new() -> Self {
            Self {
                instances: std::sync::Arc::new(DashMap::with_capacity(64)),
                by_entity: std::sync::Arc::new(DashMap::with_capacity(32)),
                by_workflow: std::sync::Arc::new(DashMap::with_capacity(16)),
            }
        }
    }

    impl Default for MemoryInstanceRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl InstanceRepository for MemoryInstanceRepository {
        async fn find_by_id(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, CoreError> {
            // Direct map lookup with no locks
            Ok(self.instances.get(&id.0).map(|instance| instance.clone()))
        }

        async fn save(&self, instance: &WorkflowInstance) -> Result<(), CoreError> {
            // Version gate; the read guard must drop before the insert
            let stored_version = self.instances.get(&instance.id.0).map(|i| i.version);
            match stored_version {
                Some(stored) => {
                    if instance.version != stored + 1 {
                        return Err(CoreError::Conflict(format!(
                            "Stale write to instance {}: stored version {}, incoming {}",
                            instance.id.0, stored, instance.version
                        )));
                    }
                }
                None => {
                    if instance.version != 1 {
                        return Err(CoreError::Conflict(format!(
                            "New instance {} must be saved at version 1, got {}",
                            instance.id.0, instance.version
                        )));
                    }
                }
            }

            self.instances
                .insert(instance.id.0.clone(), instance.clone());

            // Update entity index
            let entity_key = instance.entity.key();
            if let Some(mut ids) = self.by_entity.get_mut(&entity_key) {
                if !ids.contains(&instance.id.0) {
                    ids.push(instance.id.0.clone());
                }
            } else {
                self.by_entity.insert(entity_key, vec![instance.id.0.clone()]);
            }

            // Update workflow index
            if let Some(mut ids) = self.by_workflow.get_mut(&instance.workflow_id.0) {
                if !ids.contains(&instance.id.0) {
                    ids.push(instance.id.0.clone());
                }
            } else {
                self.by_workflow
                    .insert(instance.workflow_id.0.clone(), vec![instance.id.0.clone()]);
            }

            Ok(())
        }

        async fn delete(&self, id: &InstanceId) -> Result<(), CoreError> {
            // Grab the index keys before removing the instance
            let keys = match self.instances.get(&id.0) {
                Some(instance) => (instance.entity.key(), instance.workflow_id.0.clone()),
                None => return Ok(()),
            };

            self.instances.remove(&id.0);

            if let Some(mut ids) = self.by_entity.get_mut(&keys.0) {
                ids.retain(|i| i != &id.0);
            }
            if let Some(mut ids) = self.by_workflow.get_mut(&keys.1) {
                ids.retain(|i| i != &id.0);
            }

            Ok(())
        }

        async fn find_for_entity(
            &self,
            entity: &EntityRef,
        ) -> Result<Vec<WorkflowInstance>, CoreError> {
            let mut result = Vec::new();

            if let Some(ids) = self.by_entity.get(&entity.key()) {
                for id in ids.iter() {
                    if let Some(instance) = self.instances.get(id) {
                        result.push(instance.clone());
                    }
                }
            }

            result.sort_by_key(|i| i.started_at);

            Ok(result)
        }

        async fn find_all_for_workflow(
            &self,
            workflow_id: &WorkflowId,
        ) -> Result<Vec<InstanceId>, CoreError> {
            let instance_ids = if let Some(ids) = self.by_workflow.get(&workflow_id.0) {
                ids.iter().map(|id| InstanceId(id.clone())).collect()
            } else {
                Vec::new()
            };

            Ok(instance_ids)
        }

        async fn list_instances(
            &self,
            workflow_id: Option<&WorkflowId>,
            status: Option<InstanceStatus>,
        ) -> Result<Vec<WorkflowInstance>, CoreError> {
            let mut result = Vec::new();

            // If a workflow is given, use the indexed lookup
            if let Some(workflow_id) = workflow_id {
                if let Some(instance_ids) = self.by_workflow.get(&workflow_id.0) {
                    for id in instance_ids.iter() {
                        if let Some(instance) = self.instances.get(id) {
                            if status.map_or(true, |s| instance.status == s) {
                                result.push(instance.clone());
                            }
                        }
                    }
                }
            } else {
                for instance in self.instances.iter() {
                    if status.map_or(true, |s| instance.status == s) {
                        result.push(instance.clone());
                    }
                }
            }

            result.sort_by_key(|i| i.started_at);

            Ok(result)
        }
    }

    /// In-memory implementation of the workflow repository
    pub struct MemoryWorkflowRepository {
        workflows: std::sync::Arc<RwLock<HashMap<String, Workflow>>>,
    }

    impl MemoryWorkflowRepository {
        /// Create a new memory workflow repository
        pub fn new() -> Self {
            Self {
                workflows: std::sync::Arc::new(RwLock::new(HashMap::new())),
            }
        }
    }

    impl Default for MemoryWorkflowRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl WorkflowRepository for MemoryWorkflowRepository {
        async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError> {
            let workflows = self.workflows.read().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            Ok(workflows.get(&id.0).cloned())
        }

        async fn find_active_for_entity_type(
            &self,
            entity_type: &str,
            name: Option<&str>,
        ) -> Result<Vec<Workflow>, CoreError> {
            let workflows = self.workflows.read().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            let mut result: Vec<Workflow> = workflows
                .values()
                .filter(|w| w.is_active && w.entity_type == entity_type)
                .filter(|w| name.map_or(true, |n| w.name == n))
                .cloned()
                .collect();

            result.sort_by(|a, b| a.name.cmp(&b.name));

            Ok(result)
        }

        async fn save(&self, workflow: &Workflow) -> Result<(), CoreError> {
            let mut workflows = self.workflows.write().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            workflows.insert(workflow.id.0.clone(), workflow.clone());

            Ok(())
        }

        async fn delete(&self, id: &WorkflowId) -> Result<(), CoreError> {
            let mut workflows = self.workflows.write().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire write lock: {}", e))
            })?;

            workflows.remove(&id.0);

            Ok(())
        }

        async fn list_workflows(&self) -> Result<Vec<WorkflowId>, CoreError> {
            let workflows = self.workflows.read().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            let result = workflows.keys().map(|id| WorkflowId(id.clone())).collect();

            Ok(result)
        }

        async fn find_all(&self) -> Result<Vec<Workflow>, CoreError> {
            let workflows = self.workflows.read().map_err(|e| {
                CoreError::StateStoreError(format!("Failed to acquire read lock: {}", e))
            })?;

            let result = workflows.values().cloned().collect();

            Ok(result)
        }
    }
}
