/// Workflow instance domain models
pub mod instance;

/// Domain events
pub mod events;

/// Workflow template domain models
pub mod workflow;

/// Approval history records
pub mod history;

/// Auto-progression conditions and their evaluator
pub mod condition;

/// Repository interfaces
pub mod repository;
