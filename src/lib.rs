//!
//! Signoff Core - Approval workflow engine for the Signoff Platform
//!
//! This crate defines the domain models, state machine, and interfaces
//! for multi-step approval workflows over governance records. It owns
//! no storage and no transport: callers bring repositories, a condition
//! evaluator, and an event handler, and drive the engine through the
//! application services.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - core business models, entities, and rules
pub mod domain;

/// Application services - core application logic
pub mod application;

/// Core types and traits
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::CoreError;
pub use types::DataPacket;

// Application interfaces
pub use application::approval_service::{ApprovalService, DomainEventHandler, NoopEventHandler};
pub use application::engine_interface::{InstanceSummary, WorkflowEngine};
pub use application::template_service::WorkflowTemplateService;

// Re-export main API types for easy use
pub use domain::condition::{AutoCondition, ConditionEvaluator, DefaultConditionEvaluator};
pub use domain::events::DomainEvent;
pub use domain::history::{ApprovalHistory, ApprovalRecord, HistoryAction};
pub use domain::instance::{
    ActorId, Decision, EntityRef, InstanceId, InstanceStatus, StepId, WorkflowId, WorkflowInstance,
};
pub use domain::repository::{InstanceRepository, WorkflowRepository};
pub use domain::workflow::{StepKind, Workflow, WorkflowStep};
