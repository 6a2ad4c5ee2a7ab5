use crate::{
    domain::condition::{AutoCondition, ConditionEvaluator},
    domain::events::DomainEvent,
    domain::history::HistoryAction,
    domain::instance::{
        ActorId, Decision, EntityRef, InstanceId, InstanceStatus, WorkflowId, WorkflowInstance,
    },
    domain::repository::{InstanceRepository, WorkflowRepository},
    domain::workflow::{StepKind, Workflow},
    CoreError, DataPacket,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Service driving workflow instances through their approval steps
pub struct ApprovalService {
    /// Repository for workflow instances
    instance_repo: Arc<dyn InstanceRepository>,

    /// Repository for workflow templates
    workflow_repo: Arc<dyn WorkflowRepository>,

    /// Condition evaluator for auto-progression expressions
    condition_evaluator: Arc<dyn ConditionEvaluator>,

    /// Event handler
    event_handler: Arc<dyn DomainEventHandler>,
}

impl ApprovalService {
    /// Create a new approval service
    pub fn new(
        instance_repo: Arc<dyn InstanceRepository>,
        workflow_repo: Arc<dyn WorkflowRepository>,
        condition_evaluator: Arc<dyn ConditionEvaluator>,
        event_handler: Arc<dyn DomainEventHandler>,
    ) -> Self {
        Self {
            instance_repo,
            workflow_repo,
            condition_evaluator,
            event_handler,
        }
    }

    /// Start a new instance of a workflow against an entity
    pub async fn start_instance(
        &self,
        workflow_id: WorkflowId,
        entity: EntityRef,
        initiated_by: ActorId,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<InstanceId, CoreError> {
        // Find the workflow template
        let workflow = self
            .workflow_repo
            .find_by_id(&workflow_id)
            .await?
            .ok_or_else(|| {
                CoreError::WorkflowNotFound(format!("Workflow not found: {}", workflow_id.0))
            })?;

        let mut instance = WorkflowInstance::start(&workflow, entity, initiated_by, due_date)?;

        // Save initial state
        self.instance_repo.save(&instance).await?;

        // Handle initial events
        self.handle_events(&mut instance).await;

        // Leading notification steps complete without waiting for anyone
        self.run_auto_steps(&mut instance, &workflow, None, Utc::now())
            .await?;

        info!(
            instance_id = %instance.id.0,
            workflow_id = %workflow.id.0,
            entity = %instance.entity.key(),
            "Workflow instance started"
        );

        Ok(instance.id)
    }

    /// Start an instance by resolving the active workflow for an entity
    ///
    /// When the entity already has an instance in flight, its ID is
    /// returned and nothing new is started. With several active
    /// workflows for the entity type, `workflow_name` picks one; left
    /// empty, the first by name wins.
    pub async fn start_for_entity(
        &self,
        entity: EntityRef,
        workflow_name: Option<&str>,
        initiated_by: ActorId,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<InstanceId, CoreError> {
        if let Some(existing) = self.active_instance_for_entity(&entity).await? {
            debug!(
                instance_id = %existing.id.0,
                entity = %entity.key(),
                "Entity already has an active instance"
            );
            return Ok(existing.id);
        }

        let candidates = self
            .workflow_repo
            .find_active_for_entity_type(&entity.entity_type, workflow_name)
            .await?;

        let workflow = candidates.into_iter().next().ok_or_else(|| {
            CoreError::WorkflowNotFound(format!(
                "No active workflow for entity type {}",
                entity.entity_type
            ))
        })?;

        self.start_instance(workflow.id.clone(), entity, initiated_by, due_date)
            .await
    }

    /// Apply a human decision to the current step of an instance
    pub async fn advance_instance(
        &self,
        instance_id: &InstanceId,
        actor: ActorId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<WorkflowInstance, CoreError> {
        let mut instance = self.get_instance(instance_id).await?;
        let workflow = self.workflow_for(&instance).await?;

        instance.advance(&workflow, actor.clone(), decision, comment)?;

        self.instance_repo.save(&instance).await?;
        self.handle_events(&mut instance).await;

        // An approval can surface notification steps behind it
        self.run_auto_steps(&mut instance, &workflow, None, Utc::now())
            .await?;

        info!(
            instance_id = %instance.id.0,
            actor = %actor.0,
            decision = ?decision,
            status = ?instance.status,
            "Workflow instance advanced"
        );

        Ok(instance)
    }

    /// Cancel an instance as an administrative override
    pub async fn cancel_instance(
        &self,
        instance_id: &InstanceId,
        actor: ActorId,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, CoreError> {
        let mut instance = self.get_instance(instance_id).await?;

        instance.cancel(actor.clone(), reason)?;

        self.instance_repo.save(&instance).await?;
        self.handle_events(&mut instance).await;

        info!(
            instance_id = %instance.id.0,
            actor = %actor.0,
            "Workflow instance cancelled"
        );

        Ok(instance)
    }

    /// Evaluate auto-progression for an entity's active instances
    ///
    /// Called after the entity changes, with a snapshot of its data.
    /// Every instance whose current step's condition now holds is
    /// completed and walked forward as far as conditions allow.
    /// Returns the instances that moved.
    pub async fn check_auto_progression(
        &self,
        entity: &EntityRef,
        snapshot: &DataPacket,
    ) -> Result<Vec<InstanceId>, CoreError> {
        let instances = self.instance_repo.find_for_entity(entity).await?;

        let mut progressed = Vec::new();
        for instance in instances {
            if !instance.status.is_active() {
                continue;
            }

            let id = instance.id.clone();
            match self
                .auto_progress_instance(instance, snapshot, Utc::now())
                .await
            {
                Ok(true) => progressed.push(id),
                Ok(false) => {}
                Err(e) => {
                    // One broken instance must not stall the sweep
                    warn!(instance_id = %id.0, error = %e, "Auto-progression skipped");
                }
            }
        }

        Ok(progressed)
    }

    /// Drive time-based steps whose delay has elapsed
    ///
    /// Meant to run on a schedule. Conditions that need entity data do
    /// not fire here; entity updates go through
    /// `check_auto_progression` instead.
    pub async fn process_due_steps(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<InstanceId>, CoreError> {
        let snapshot = DataPacket::null();
        let mut progressed = Vec::new();

        for status in [InstanceStatus::Pending, InstanceStatus::InProgress] {
            let instances = self.instance_repo.list_instances(None, Some(status)).await?;

            for instance in instances {
                let id = instance.id.clone();
                match self.auto_progress_instance(instance, &snapshot, now).await {
                    Ok(true) => progressed.push(id),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(instance_id = %id.0, error = %e, "Due-step processing skipped");
                    }
                }
            }
        }

        Ok(progressed)
    }

    /// Get a workflow instance by ID
    pub async fn get_instance(&self, id: &InstanceId) -> Result<WorkflowInstance, CoreError> {
        self.instance_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::InstanceNotFound(format!("Instance not found: {}", id.0)))
    }

    /// The most recently started instance for an entity, if any
    pub async fn latest_instance_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<WorkflowInstance>, CoreError> {
        let instances = self.instance_repo.find_for_entity(entity).await?;
        Ok(instances.into_iter().last())
    }

    /// The entity's instance still accepting decisions, if any
    pub async fn active_instance_for_entity(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<WorkflowInstance>, CoreError> {
        let instances = self.instance_repo.find_for_entity(entity).await?;
        Ok(instances.into_iter().filter(|i| i.status.is_active()).last())
    }

    /// List instances with optional filters
    pub async fn list_instances(
        &self,
        workflow_id: Option<&WorkflowId>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>, CoreError> {
        self.instance_repo.list_instances(workflow_id, status).await
    }

    /// Instances past their due date and not yet finished
    pub async fn overdue_instances(&self) -> Result<Vec<WorkflowInstance>, CoreError> {
        let instances = self.instance_repo.list_instances(None, None).await?;
        Ok(instances.into_iter().filter(|i| i.is_overdue()).collect())
    }

    /// Instances whose current step the given actor may approve
    ///
    /// `roles` are the roles the caller asserts for the actor; the
    /// engine does not own role membership.
    pub async fn pending_approvals_for(
        &self,
        actor: &ActorId,
        roles: &[String],
    ) -> Result<Vec<WorkflowInstance>, CoreError> {
        let mut result = Vec::new();

        for instance in self.instance_repo.list_instances(None, None).await? {
            if !instance.status.is_active() {
                continue;
            }

            let workflow = match self.workflow_repo.find_by_id(&instance.workflow_id).await? {
                Some(workflow) => workflow,
                None => continue,
            };

            if let Some(step) = instance.resolve_current_step(&workflow) {
                if step.kind == StepKind::Approval && step.is_approver(actor, roles) {
                    result.push(instance);
                }
            }
        }

        Ok(result)
    }

    async fn workflow_for(&self, instance: &WorkflowInstance) -> Result<Workflow, CoreError> {
        self.workflow_repo
            .find_by_id(&instance.workflow_id)
            .await?
            .ok_or_else(|| {
                CoreError::WorkflowNotFound(format!(
                    "Workflow not found: {}",
                    instance.workflow_id.0
                ))
            })
    }

    async fn auto_progress_instance(
        &self,
        mut instance: WorkflowInstance,
        snapshot: &DataPacket,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let workflow = self.workflow_for(&instance).await?;
        self.run_auto_steps(&mut instance, &workflow, Some(snapshot), now)
            .await
    }

    // Completes current steps that need no human: notification steps
    // always, condition-gated steps when a snapshot is given and the
    // condition holds. Each hop is persisted before the next.
    async fn run_auto_steps(
        &self,
        instance: &mut WorkflowInstance,
        workflow: &Workflow,
        snapshot: Option<&DataPacket>,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut progressed = false;

        loop {
            let step = match instance.resolve_current_step(workflow) {
                Some(step) => step.clone(),
                None => break,
            };

            let completed = if step.kind == StepKind::Notification {
                instance.auto_complete_current(
                    workflow,
                    ActorId::system(),
                    HistoryAction::NotificationSent,
                    Some("Notification sent".to_string()),
                )?;
                true
            } else if let (Some(condition), Some(snapshot)) = (&step.auto_condition, snapshot) {
                let satisfied = condition.is_satisfied(
                    snapshot,
                    self.condition_evaluator.as_ref(),
                    instance.current_step_activated_at(),
                    now,
                )?;

                if satisfied {
                    instance.auto_complete_current(
                        workflow,
                        ActorId::system(),
                        HistoryAction::AutoApproved,
                        Some(auto_comment(condition).to_string()),
                    )?;
                    true
                } else {
                    false
                }
            } else {
                false
            };

            if !completed {
                break;
            }

            progressed = true;
            self.instance_repo.save(instance).await?;
            self.handle_events(instance).await;

            debug!(
                instance_id = %instance.id.0,
                step_id = %step.id.0,
                "Step auto-completed"
            );

            if instance.status.is_terminal() {
                break;
            }
        }

        Ok(progressed)
    }

    // Events are best-effort notifications; a broken handler must not
    // fail the transition that already committed.
    async fn handle_events(&self, instance: &mut WorkflowInstance) {
        let events = instance.take_events();

        for event in events {
            if let Err(e) = self.event_handler.handle_event(event).await {
                warn!(error = %e, "Domain event handler failed");
            }
        }
    }
}

/// Clone implementation for ApprovalService
impl Clone for ApprovalService {
    fn clone(&self) -> Self {
        Self {
            instance_repo: self.instance_repo.clone(),
            workflow_repo: self.workflow_repo.clone(),
            condition_evaluator: self.condition_evaluator.clone(),
            event_handler: self.event_handler.clone(),
        }
    }
}

fn auto_comment(condition: &AutoCondition) -> &'static str {
    match condition {
        AutoCondition::FieldCompletion { .. } => {
            "Step automatically approved based on field completion"
        }
        AutoCondition::Auto { .. } => "Step automatically approved",
        AutoCondition::TimeBased { .. } => "Step automatically approved after configured delay",
    }
}

/// Handler for domain events
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError>;
}

/// Event handler that drops every event
#[derive(Debug, Default)]
pub struct NoopEventHandler;

#[async_trait]
impl DomainEventHandler for NoopEventHandler {
    async fn handle_event(&self, _event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        Ok(())
    }
}
