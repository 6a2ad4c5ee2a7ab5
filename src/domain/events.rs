use crate::domain::history::HistoryAction;
use crate::domain::instance::{ActorId, EntityRef, InstanceId, StepId, WorkflowId};
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all events in the system
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the workflow instance ID this event is associated with
    fn instance_id(&self) -> &InstanceId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Event: Workflow instance started
#[derive(Debug)]
pub struct InstanceStarted {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,

    /// The identifier of the workflow template
    pub workflow_id: WorkflowId,

    /// The entity under approval
    pub entity: EntityRef,

    /// The identity that started the instance
    pub initiated_by: ActorId,

    /// The timestamp when the instance was started
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceStarted {
    fn event_type(&self) -> &'static str {
        "workflow_instance.started"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: A step was approved by a human decision
#[derive(Debug)]
pub struct StepApproved {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,
    /// The identifier of the approved step
    pub step_id: StepId,
    /// The identity that approved
    pub actor: ActorId,
    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepApproved {
    fn event_type(&self) -> &'static str {
        "workflow_instance.step_approved"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: A step completed without a human decision
#[derive(Debug)]
pub struct StepAutoCompleted {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,
    /// The identifier of the completed step
    pub step_id: StepId,
    /// How the step completed
    pub action: HistoryAction,
    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepAutoCompleted {
    fn event_type(&self) -> &'static str {
        "workflow_instance.step_auto_completed"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Workflow instance approved, all steps completed
#[derive(Debug)]
pub struct InstanceApproved {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,
    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceApproved {
    fn event_type(&self) -> &'static str {
        "workflow_instance.approved"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Workflow instance rejected
#[derive(Debug)]
pub struct InstanceRejected {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,
    /// The step the rejection was made on
    pub step_id: StepId,
    /// The identity that rejected
    pub actor: ActorId,
    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceRejected {
    fn event_type(&self) -> &'static str {
        "workflow_instance.rejected"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Workflow instance cancelled
#[derive(Debug)]
pub struct InstanceCancelled {
    /// The unique identifier of the instance
    pub instance_id: InstanceId,
    /// The identity that cancelled
    pub actor: ActorId,
    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for InstanceCancelled {
    fn event_type(&self) -> &'static str {
        "workflow_instance.cancelled"
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
