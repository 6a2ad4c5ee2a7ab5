use thiserror::Error;

/// Core error type for the approval engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Workflow template not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow instance not found
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// Workflow is not in a state that allows the operation
    #[error("Invalid workflow state: {0}")]
    InvalidWorkflowState(String),

    /// Transition attempted on a terminal instance
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Instance has no current step while a step operation was requested
    #[error("No current step: {0}")]
    NoCurrentStep(String),

    /// Duplicate step order detected during sequencing
    #[error("Step order conflict: {0}")]
    OrderConflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Optimistic concurrency check failed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Condition evaluation error
    #[error("Condition evaluation error: {0}")]
    ConditionEvaluationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
