use crate::{
    application::approval_service::{ApprovalService, DomainEventHandler},
    application::template_service::WorkflowTemplateService,
    domain::condition::DefaultConditionEvaluator,
    domain::instance::{
        ActorId, Decision, EntityRef, InstanceId, InstanceStatus, StepId, WorkflowId,
        WorkflowInstance,
    },
    domain::repository::{InstanceRepository, WorkflowRepository},
    domain::workflow::{Workflow, WorkflowStep},
    CoreError, DataPacket,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Summary information about a workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    /// Instance ID
    pub id: String,

    /// Workflow ID
    pub workflow_id: String,

    /// The entity under approval, as "Type#id"
    pub entity: String,

    /// Current status
    pub status: InstanceStatus,

    /// Step awaiting a decision, if any
    pub current_step: Option<String>,

    /// Share of template steps completed, 0 to 100
    pub progress: u8,

    /// Whether the instance is past its due date
    pub is_overdue: bool,

    /// Start timestamp
    pub started_at: String,

    /// Due date, if any
    pub due_date: Option<String>,
}

/// The main API the engine offers to the rest of the platform
#[derive(Clone)]
pub struct WorkflowEngine {
    approval_service: Arc<ApprovalService>,
    template_service: Arc<WorkflowTemplateService>,
}

impl WorkflowEngine {
    /// Create a new workflow engine from prebuilt services
    pub fn new(
        approval_service: Arc<ApprovalService>,
        template_service: Arc<WorkflowTemplateService>,
    ) -> Self {
        Self {
            approval_service,
            template_service,
        }
    }

    /// Create a workflow engine with externally-provided repositories
    ///
    /// This is the preferred way to build the engine. It allows using
    /// custom repository implementations from external crates without
    /// coupling the core to specific infrastructure. The expression
    /// evaluator is the built-in one.
    pub fn with_repositories(
        workflow_repo: Arc<dyn WorkflowRepository>,
        instance_repo: Arc<dyn InstanceRepository>,
        event_handler: Arc<dyn DomainEventHandler>,
    ) -> Self {
        // Create condition evaluator
        let condition_evaluator = Arc::new(DefaultConditionEvaluator::new());

        // Create services
        let approval_service = Arc::new(ApprovalService::new(
            instance_repo.clone(),
            workflow_repo.clone(),
            condition_evaluator,
            event_handler,
        ));

        let template_service = Arc::new(WorkflowTemplateService::new(
            workflow_repo,
            instance_repo,
        ));

        Self::new(approval_service, template_service)
    }

    /// Deploy a workflow template
    pub async fn deploy_workflow(&self, workflow: Workflow) -> Result<(), CoreError> {
        self.template_service.save_workflow(workflow).await
    }

    /// Get a workflow template by ID
    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, CoreError> {
        self.template_service.get_workflow(id).await
    }

    /// List all workflow IDs
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowId>, CoreError> {
        self.template_service.list_workflows().await
    }

    /// Stop new instances from starting on a workflow
    pub async fn deactivate_workflow(&self, id: &WorkflowId) -> Result<(), CoreError> {
        self.template_service.deactivate_workflow(id).await
    }

    /// Allow new instances to start on a workflow again
    pub async fn activate_workflow(&self, id: &WorkflowId) -> Result<(), CoreError> {
        self.template_service.activate_workflow(id).await
    }

    /// Append a step to the end of a workflow
    pub async fn add_step(
        &self,
        workflow_id: &WorkflowId,
        step: WorkflowStep,
    ) -> Result<StepId, CoreError> {
        self.template_service.add_step(workflow_id, step).await
    }

    /// Remove a step from a workflow
    pub async fn remove_step(
        &self,
        workflow_id: &WorkflowId,
        step_id: &StepId,
    ) -> Result<WorkflowStep, CoreError> {
        self.template_service.remove_step(workflow_id, step_id).await
    }

    /// Renumber a workflow's steps to follow the given sequence
    pub async fn reorder_steps(
        &self,
        workflow_id: &WorkflowId,
        ordered_ids: &[StepId],
    ) -> Result<(), CoreError> {
        self.template_service
            .reorder_steps(workflow_id, ordered_ids)
            .await
    }

    /// Start an instance of a specific workflow against an entity
    pub async fn start_workflow(
        &self,
        workflow_id: WorkflowId,
        entity: EntityRef,
        initiated_by: ActorId,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<InstanceId, CoreError> {
        self.approval_service
            .start_instance(workflow_id, entity, initiated_by, due_date)
            .await
    }

    /// Start an instance by resolving the entity type's active workflow
    pub async fn start_for_entity(
        &self,
        entity: EntityRef,
        workflow_name: Option<&str>,
        initiated_by: ActorId,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<InstanceId, CoreError> {
        self.approval_service
            .start_for_entity(entity, workflow_name, initiated_by, due_date)
            .await
    }

    /// Approve the current step of an instance
    pub async fn approve_step(
        &self,
        instance_id: &InstanceId,
        actor: ActorId,
        comment: Option<String>,
    ) -> Result<InstanceSummary, CoreError> {
        let instance = self
            .approval_service
            .advance_instance(instance_id, actor, Decision::Approve, comment)
            .await?;
        Ok(self.summarize(&instance).await)
    }

    /// Reject the current step of an instance, ending it
    pub async fn reject_step(
        &self,
        instance_id: &InstanceId,
        actor: ActorId,
        comment: Option<String>,
    ) -> Result<InstanceSummary, CoreError> {
        let instance = self
            .approval_service
            .advance_instance(instance_id, actor, Decision::Reject, comment)
            .await?;
        Ok(self.summarize(&instance).await)
    }

    /// Apply a decision to the current step of an instance
    pub async fn advance_instance(
        &self,
        instance_id: &InstanceId,
        actor: ActorId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<InstanceSummary, CoreError> {
        let instance = self
            .approval_service
            .advance_instance(instance_id, actor, decision, comment)
            .await?;
        Ok(self.summarize(&instance).await)
    }

    /// Cancel an instance as an administrative override
    pub async fn cancel_instance(
        &self,
        instance_id: &InstanceId,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<InstanceSummary, CoreError> {
        let instance = self
            .approval_service
            .cancel_instance(instance_id, actor, reason)
            .await?;
        Ok(self.summarize(&instance).await)
    }

    /// Evaluate auto-progression for an entity after its data changed
    pub async fn check_auto_progression(
        &self,
        entity: &EntityRef,
        snapshot: &DataPacket,
    ) -> Result<Vec<InstanceId>, CoreError> {
        self.approval_service
            .check_auto_progression(entity, snapshot)
            .await
    }

    /// Drive time-based steps whose delay has elapsed
    pub async fn process_due_steps(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<InstanceId>, CoreError> {
        self.approval_service.process_due_steps(now).await
    }

    /// Summary of one instance
    pub async fn instance_summary(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceSummary, CoreError> {
        let instance = self.approval_service.get_instance(instance_id).await?;
        Ok(self.summarize(&instance).await)
    }

    /// Full state of an instance as JSON, if it exists
    pub async fn get_instance_state(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<serde_json::Value>, CoreError> {
        match self.approval_service.get_instance(instance_id).await {
            Ok(instance) => Ok(Some(serde_json::to_value(instance)?)),
            Err(CoreError::InstanceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List instance summaries with optional filters
    pub async fn list_instances(
        &self,
        workflow_id: Option<&WorkflowId>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<InstanceSummary>, CoreError> {
        let instances = self
            .approval_service
            .list_instances(workflow_id, status)
            .await?;
        Ok(self.summarize_all(&instances).await)
    }

    /// Instances whose current step the given actor may approve
    pub async fn pending_approvals_for(
        &self,
        actor: &ActorId,
        roles: &[String],
    ) -> Result<Vec<InstanceSummary>, CoreError> {
        let instances = self
            .approval_service
            .pending_approvals_for(actor, roles)
            .await?;
        Ok(self.summarize_all(&instances).await)
    }

    /// Instances past their due date and not yet finished
    pub async fn overdue_instances(&self) -> Result<Vec<InstanceSummary>, CoreError> {
        let instances = self.approval_service.overdue_instances().await?;
        Ok(self.summarize_all(&instances).await)
    }

    // Progress needs the template; a vanished template reads as 0
    // rather than failing the whole listing.
    async fn summarize(&self, instance: &WorkflowInstance) -> InstanceSummary {
        let progress = match self
            .template_service
            .get_workflow(&instance.workflow_id)
            .await
        {
            Ok(workflow) => instance.progress_percentage(&workflow),
            Err(_) => 0,
        };

        InstanceSummary {
            id: instance.id.0.clone(),
            workflow_id: instance.workflow_id.0.clone(),
            entity: instance.entity.key(),
            status: instance.status,
            current_step: instance.current_step.as_ref().map(|s| s.0.clone()),
            progress,
            is_overdue: instance.is_overdue(),
            started_at: instance.started_at.to_rfc3339(),
            due_date: instance.due_date.map(|d| d.to_rfc3339()),
        }
    }

    async fn summarize_all(&self, instances: &[WorkflowInstance]) -> Vec<InstanceSummary> {
        let mut summaries = Vec::with_capacity(instances.len());
        for instance in instances {
            summaries.push(self.summarize(instance).await);
        }
        summaries
    }
}
