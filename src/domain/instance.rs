use crate::domain::events::{
    DomainEvent, InstanceApproved, InstanceCancelled, InstanceRejected, InstanceStarted,
    StepApproved, StepAutoCompleted,
};
use crate::domain::history::{ApprovalHistory, ApprovalRecord, HistoryAction};
use crate::domain::workflow::{Workflow, WorkflowStep};
use crate::CoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Started, waiting for the first decision
    Pending,

    /// At least one step decided, more remain
    InProgress,

    /// All steps approved; terminal
    Approved,

    /// A step was rejected; terminal
    Rejected,

    /// Cancelled as an administrative override; terminal
    Cancelled,
}

impl InstanceStatus {
    /// Whether no further transitions are permitted
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Approved | InstanceStatus::Rejected | InstanceStatus::Cancelled
        )
    }

    /// Whether the instance still accepts decisions
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// A decision handed to `advance`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Complete the current step and move on
    Approve,

    /// End the instance; partial approval is not resumable
    Reject,
}

/// Value object: Workflow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

/// Value object: Step ID
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

/// Value object: Workflow instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

/// Value object: identity of a human or system actor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    /// The identity recorded for decisions the engine makes itself
    pub fn system() -> Self {
        ActorId("system".to_string())
    }
}

/// Weak reference to the business record under approval
///
/// The engine never loads or validates the record; resolving the pair
/// back to a concrete row is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Category tag, e.g. "Risk"
    pub entity_type: String,

    /// Identifier of the record within its category
    pub entity_id: i64,
}

impl EntityRef {
    /// Create an entity reference
    pub fn new(entity_type: impl Into<String>, entity_id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }

    /// Stable lookup key, e.g. "Risk#42"
    pub fn key(&self) -> String {
        format!("{}#{}", self.entity_type, self.entity_id)
    }
}

/// Aggregate: one running execution of a workflow against an entity
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique identifier
    pub id: InstanceId,

    /// Workflow template this instance walks through
    pub workflow_id: WorkflowId,

    /// The business record under approval
    pub entity: EntityRef,

    /// Current status
    pub status: InstanceStatus,

    /// Step awaiting a decision; none once terminal
    pub current_step: Option<StepId>,

    /// Steps already completed, each id at most once
    pub completed_steps: BTreeSet<StepId>,

    /// Append-only audit trail of decisions
    pub approval_history: ApprovalHistory,

    /// Identity that started the instance
    pub initiated_by: ActorId,

    /// Start timestamp, immutable
    pub started_at: DateTime<Utc>,

    /// Set exactly once, when the instance enters a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Deadline used only for the derived overdue flag
    pub due_date: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, bumped once per transition
    pub version: u64,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Domain events
    #[serde(skip)]
    pub events: Vec<Box<dyn DomainEvent>>,
}

// Manually implement Clone for WorkflowInstance
impl Clone for WorkflowInstance {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            entity: self.entity.clone(),
            status: self.status,
            current_step: self.current_step.clone(),
            completed_steps: self.completed_steps.clone(),
            approval_history: self.approval_history.clone(),
            initiated_by: self.initiated_by.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            due_date: self.due_date,
            version: self.version,
            updated_at: self.updated_at,
            events: Vec::new(), // We don't clone domain events
        }
    }
}

impl WorkflowInstance {
    /// Start a new instance of the given workflow
    ///
    /// The workflow must be active and have at least one step. The
    /// instance starts `Pending` on the step with the lowest order.
    /// When no explicit due date is given, the first step's SLA sets
    /// one.
    pub fn start(
        workflow: &Workflow,
        entity: EntityRef,
        initiated_by: ActorId,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<Self, CoreError> {
        if !workflow.is_active {
            return Err(CoreError::InvalidWorkflowState(format!(
                "Workflow {} is not active",
                workflow.id.0
            )));
        }

        if workflow.steps.is_empty() {
            return Err(CoreError::InvalidWorkflowState(format!(
                "Workflow {} has no steps",
                workflow.id.0
            )));
        }

        let first = workflow.first_step()?.ok_or_else(|| {
            CoreError::InvalidWorkflowState(format!("Workflow {} has no steps", workflow.id.0))
        })?;

        let now = Utc::now();
        let due_date =
            due_date.or_else(|| first.sla_days.map(|d| now + Duration::days(i64::from(d))));

        let instance_id = InstanceId(Uuid::new_v4().to_string());
        let mut instance = Self {
            id: instance_id.clone(),
            workflow_id: workflow.id.clone(),
            entity: entity.clone(),
            status: InstanceStatus::Pending,
            current_step: Some(first.id.clone()),
            completed_steps: BTreeSet::new(),
            approval_history: ApprovalHistory::new(),
            initiated_by: initiated_by.clone(),
            started_at: now,
            completed_at: None,
            due_date,
            version: 1,
            updated_at: now,
            events: Vec::with_capacity(4),
        };

        instance.record_event(Box::new(InstanceStarted {
            instance_id,
            workflow_id: workflow.id.clone(),
            entity,
            initiated_by,
            timestamp: now,
        }));

        Ok(instance)
    }

    /// Apply a human decision to the current step
    ///
    /// Appends a history record in every case. Approval completes the
    /// current step and moves to the next incomplete step by order, or
    /// finishes the instance when none remains. Rejection ends the
    /// instance immediately.
    pub fn advance(
        &mut self,
        workflow: &Workflow,
        actor: ActorId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<(), CoreError> {
        let (current_id, step_name, step_order) = self.resolve_current(workflow)?;

        match decision {
            Decision::Approve => {
                self.approval_history.append(ApprovalRecord::new(
                    Some(current_id.clone()),
                    Some(step_name),
                    actor.clone(),
                    HistoryAction::Approved,
                    comment,
                ));

                // Re-adding an already-completed id is a no-op
                self.completed_steps.insert(current_id.clone());

                self.record_event(Box::new(StepApproved {
                    instance_id: self.id.clone(),
                    step_id: current_id,
                    actor,
                    timestamp: Utc::now(),
                }));

                self.move_to_next_step(workflow, step_order)?;
            }
            Decision::Reject => {
                self.approval_history.append(ApprovalRecord::new(
                    Some(current_id.clone()),
                    Some(step_name),
                    actor.clone(),
                    HistoryAction::Rejected,
                    comment,
                ));

                let now = Utc::now();
                self.status = InstanceStatus::Rejected;
                self.current_step = None;
                self.completed_at = Some(now);

                self.record_event(Box::new(InstanceRejected {
                    instance_id: self.id.clone(),
                    step_id: current_id,
                    actor,
                    timestamp: now,
                }));
            }
        }

        self.version += 1;
        self.update_timestamp();
        Ok(())
    }

    /// Complete the current step without a human decision
    ///
    /// Used for notification steps and satisfied auto-conditions; the
    /// action must be `AutoApproved` or `NotificationSent`.
    pub fn auto_complete_current(
        &mut self,
        workflow: &Workflow,
        actor: ActorId,
        action: HistoryAction,
        comment: Option<String>,
    ) -> Result<(), CoreError> {
        if !matches!(
            action,
            HistoryAction::AutoApproved | HistoryAction::NotificationSent
        ) {
            return Err(CoreError::ValidationError(format!(
                "{:?} is not an automatic action",
                action
            )));
        }

        let (current_id, step_name, step_order) = self.resolve_current(workflow)?;

        self.approval_history.append(ApprovalRecord::new(
            Some(current_id.clone()),
            Some(step_name),
            actor,
            action,
            comment,
        ));

        self.completed_steps.insert(current_id.clone());

        self.record_event(Box::new(StepAutoCompleted {
            instance_id: self.id.clone(),
            step_id: current_id,
            action,
            timestamp: Utc::now(),
        }));

        self.move_to_next_step(workflow, step_order)?;

        self.version += 1;
        self.update_timestamp();
        Ok(())
    }

    /// Cancel the instance as an administrative override
    ///
    /// Allowed only while `Pending` or `InProgress`. The cancellation
    /// is recorded in the approval history like any other decision.
    pub fn cancel(&mut self, actor: ActorId, reason: Option<String>) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot cancel instance {} in state {:?}",
                self.id.0, self.status
            )));
        }

        self.approval_history.append(ApprovalRecord::new(
            self.current_step.clone(),
            None,
            actor.clone(),
            HistoryAction::Cancelled,
            reason,
        ));

        let now = Utc::now();
        self.status = InstanceStatus::Cancelled;
        self.current_step = None;
        self.completed_at = Some(now);

        self.record_event(Box::new(InstanceCancelled {
            instance_id: self.id.clone(),
            actor,
            timestamp: now,
        }));

        self.version += 1;
        self.update_timestamp();
        Ok(())
    }

    /// Percentage of template steps completed, rounded
    ///
    /// Computed against the current template: editing the template
    /// shifts the percentage of in-flight instances. A workflow with
    /// no steps reports 0.
    pub fn progress_percentage(&self, workflow: &Workflow) -> u8 {
        let total = workflow.steps.len();
        if total == 0 {
            return 0;
        }

        let completed = self.completed_steps.len();
        ((completed as f64 / total as f64) * 100.0).round() as u8
    }

    /// Whether the instance has blown past its due date
    ///
    /// Terminal instances are never overdue regardless of date.
    pub fn is_overdue(&self) -> bool {
        match self.due_date {
            Some(due) => due < Utc::now() && self.completed_at.is_none(),
            None => false,
        }
    }

    /// Resolve the current step pointer against the template
    #[inline]
    pub fn resolve_current_step<'a>(&self, workflow: &'a Workflow) -> Option<&'a WorkflowStep> {
        self.current_step.as_ref().and_then(|id| workflow.step(id))
    }

    /// When the current step became current
    ///
    /// The most recent history entry marks the previous step's
    /// decision; with no history the instance has been on its first
    /// step since it started.
    pub fn current_step_activated_at(&self) -> DateTime<Utc> {
        self.approval_history
            .last()
            .map(|r| r.timestamp)
            .unwrap_or(self.started_at)
    }

    /// Check the structural invariants against the template
    pub fn check_consistency(&self, workflow: &Workflow) -> Result<(), CoreError> {
        for step_id in &self.completed_steps {
            if workflow.step(step_id).is_none() {
                return Err(CoreError::ValidationError(format!(
                    "Completed step {} is not part of workflow {}",
                    step_id.0, workflow.id.0
                )));
            }
        }

        if let Some(current) = &self.current_step {
            if workflow.step(current).is_none() {
                return Err(CoreError::NoCurrentStep(format!(
                    "Current step {} is not part of workflow {}",
                    current.0, workflow.id.0
                )));
            }
            if self.completed_steps.contains(current) {
                return Err(CoreError::ValidationError(format!(
                    "Current step {} is already completed",
                    current.0
                )));
            }
        }

        if self.status.is_terminal() {
            if self.current_step.is_some() {
                return Err(CoreError::ValidationError(format!(
                    "Terminal instance {} still has a current step",
                    self.id.0
                )));
            }
            if self.completed_at.is_none() {
                return Err(CoreError::ValidationError(format!(
                    "Terminal instance {} has no completion timestamp",
                    self.id.0
                )));
            }
        }

        Ok(())
    }

    /// Update the timestamp
    #[inline]
    pub fn update_timestamp(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Get and clear all domain events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    // Guards shared by every step decision: the instance must be
    // non-terminal and its pointer must resolve in the template.
    fn resolve_current(&self, workflow: &Workflow) -> Result<(StepId, String, u32), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "Instance {} is in terminal state {:?}",
                self.id.0, self.status
            )));
        }

        let current_id = self.current_step.clone().ok_or_else(|| {
            CoreError::NoCurrentStep(format!("Instance {} has no current step", self.id.0))
        })?;

        let step = workflow.step(&current_id).ok_or_else(|| {
            CoreError::NoCurrentStep(format!(
                "Step {} is not part of workflow {}",
                current_id.0, workflow.id.0
            ))
        })?;

        Ok((current_id, step.name.clone(), step.order))
    }

    // Walks to the next incomplete step by order, or finishes the
    // instance when none remains.
    fn move_to_next_step(&mut self, workflow: &Workflow, from_order: u32) -> Result<(), CoreError> {
        let now = Utc::now();

        match workflow.next_step_after(from_order, &self.completed_steps)? {
            Some(next) => {
                self.current_step = Some(next.id.clone());
                self.status = InstanceStatus::InProgress;
                if let Some(days) = next.sla_days {
                    self.due_date = Some(now + Duration::days(i64::from(days)));
                }
            }
            None => {
                self.current_step = None;
                self.status = InstanceStatus::Approved;
                self.completed_at = Some(now);

                self.record_event(Box::new(InstanceApproved {
                    instance_id: self.id.clone(),
                    timestamp: now,
                }));
            }
        }

        Ok(())
    }
}
