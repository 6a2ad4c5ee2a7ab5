use crate::{
    domain::instance::{StepId, WorkflowId},
    domain::repository::{InstanceRepository, WorkflowRepository},
    domain::workflow::{Workflow, WorkflowStep},
    CoreError,
};
use std::sync::Arc;

/// Service for managing workflow templates
pub struct WorkflowTemplateService {
    /// Repository for workflow templates
    workflow_repo: Arc<dyn WorkflowRepository>,

    /// Repository for workflow instances
    instance_repo: Arc<dyn InstanceRepository>,
}

impl WorkflowTemplateService {
    /// Create a new workflow template service
    pub fn new(
        workflow_repo: Arc<dyn WorkflowRepository>,
        instance_repo: Arc<dyn InstanceRepository>,
    ) -> Self {
        Self {
            workflow_repo,
            instance_repo,
        }
    }

    /// Save a workflow template after validating it
    pub async fn save_workflow(&self, workflow: Workflow) -> Result<(), CoreError> {
        workflow.validate()?;

        self.workflow_repo.save(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow.id.0,
            entity_type = %workflow.entity_type,
            steps = workflow.steps.len(),
            "Workflow saved"
        );

        Ok(())
    }

    /// Get a workflow template by ID
    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, CoreError> {
        self.load(id).await
    }

    /// Stop new instances from starting on this workflow
    ///
    /// Instances already in flight keep running against the template.
    pub async fn deactivate_workflow(&self, id: &WorkflowId) -> Result<(), CoreError> {
        let mut workflow = self.load(id).await?;
        workflow.deactivate();
        self.workflow_repo.save(&workflow).await?;

        tracing::info!(workflow_id = %id.0, "Workflow deactivated");

        Ok(())
    }

    /// Allow new instances to start on this workflow again
    pub async fn activate_workflow(&self, id: &WorkflowId) -> Result<(), CoreError> {
        let mut workflow = self.load(id).await?;
        workflow.activate();
        self.workflow_repo.save(&workflow).await?;

        tracing::info!(workflow_id = %id.0, "Workflow activated");

        Ok(())
    }

    /// Delete a workflow template and every instance started from it
    pub async fn delete_workflow(&self, id: &WorkflowId) -> Result<(), CoreError> {
        // Remove instances first so no orphans point at the template
        let instances = self.instance_repo.find_all_for_workflow(id).await?;
        for instance_id in &instances {
            self.instance_repo.delete(instance_id).await?;
        }

        self.workflow_repo.delete(id).await?;

        tracing::info!(
            workflow_id = %id.0,
            instances_deleted = instances.len(),
            "Workflow deleted"
        );

        Ok(())
    }

    /// Append a step to the end of a workflow
    ///
    /// The step's order is assigned from the current maximum, so the
    /// caller never has to know the numbering.
    pub async fn add_step(
        &self,
        workflow_id: &WorkflowId,
        step: WorkflowStep,
    ) -> Result<StepId, CoreError> {
        let mut workflow = self.load(workflow_id).await?;
        let step_id = workflow.append_step(step)?;
        workflow.validate()?;
        self.workflow_repo.save(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow_id.0,
            step_id = %step_id.0,
            "Step appended"
        );

        Ok(step_id)
    }

    /// Insert a step at an explicit order position
    ///
    /// Fails with `OrderConflict` when the position is already taken.
    pub async fn insert_step(
        &self,
        workflow_id: &WorkflowId,
        step: WorkflowStep,
    ) -> Result<StepId, CoreError> {
        let mut workflow = self.load(workflow_id).await?;
        let step_id = workflow.insert_step(step)?;
        workflow.validate()?;
        self.workflow_repo.save(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow_id.0,
            step_id = %step_id.0,
            "Step inserted"
        );

        Ok(step_id)
    }

    /// Remove a step from a workflow
    ///
    /// Remaining steps keep their order values; gaps in the numbering
    /// are legal.
    pub async fn remove_step(
        &self,
        workflow_id: &WorkflowId,
        step_id: &StepId,
    ) -> Result<WorkflowStep, CoreError> {
        let mut workflow = self.load(workflow_id).await?;

        let removed = workflow.remove_step(step_id).ok_or_else(|| {
            CoreError::ValidationError(format!(
                "Step {} not found in workflow {}",
                step_id.0, workflow_id.0
            ))
        })?;

        self.workflow_repo.save(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow_id.0,
            step_id = %step_id.0,
            "Step removed"
        );

        Ok(removed)
    }

    /// Renumber a workflow's steps to follow the given sequence
    pub async fn reorder_steps(
        &self,
        workflow_id: &WorkflowId,
        ordered_ids: &[StepId],
    ) -> Result<(), CoreError> {
        let mut workflow = self.load(workflow_id).await?;
        workflow.reorder_steps(ordered_ids)?;
        self.workflow_repo.save(&workflow).await?;

        tracing::info!(workflow_id = %workflow_id.0, "Steps reordered");

        Ok(())
    }

    /// List all workflow IDs
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowId>, CoreError> {
        self.workflow_repo.list_workflows().await
    }

    /// Get all workflow templates
    pub async fn get_all_workflows(&self) -> Result<Vec<Workflow>, CoreError> {
        self.workflow_repo.find_all().await
    }

    /// Active workflows that apply to an entity type
    pub async fn active_workflows_for(
        &self,
        entity_type: &str,
        name: Option<&str>,
    ) -> Result<Vec<Workflow>, CoreError> {
        self.workflow_repo
            .find_active_for_entity_type(entity_type, name)
            .await
    }

    async fn load(&self, id: &WorkflowId) -> Result<Workflow, CoreError> {
        self.workflow_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(format!("Workflow not found: {}", id.0)))
    }
}
