/// Approval execution service
pub mod approval_service;

/// Workflow template management service
pub mod template_service;

/// Engine interface for external systems
pub mod engine_interface;
