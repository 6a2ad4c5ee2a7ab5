use crate::domain::instance::{ActorId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Action recorded in the approval history of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// A human approved the current step
    Approved,

    /// A human rejected the current step
    Rejected,

    /// The instance was cancelled as an administrative override
    Cancelled,

    /// A step auto-completed because its condition held
    AutoApproved,

    /// A notification step completed without human action
    NotificationSent,
}

/// One entry in the approval history of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// The step the decision was made on, absent for a cancel
    /// issued while no step was current
    pub step_id: Option<StepId>,

    /// Step name at decision time, kept for audit even if the
    /// template is edited later; absent when the decision was not
    /// resolved against the template
    pub step_name: Option<String>,

    /// Identity that made the decision
    pub actor: ActorId,

    /// What was decided
    pub action: HistoryAction,

    /// Free-form comment attached to the decision
    pub comment: Option<String>,

    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}

impl ApprovalRecord {
    /// Create a record stamped with the current time
    pub fn new(
        step_id: Option<StepId>,
        step_name: Option<String>,
        actor: ActorId,
        action: HistoryAction,
        comment: Option<String>,
    ) -> Self {
        Self {
            step_id,
            step_name,
            actor,
            action,
            comment,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit trail of decisions on an instance
///
/// Entries are never mutated, reordered, or removed after append;
/// the type exposes no operation that could do so.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalHistory(Vec<ApprovalRecord>);

impl ApprovalHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a record to the end of the trail
    pub fn append(&mut self, record: ApprovalRecord) {
        self.0.push(record);
    }

    /// Number of recorded decisions
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether any decision has been recorded
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent record, if any
    #[inline]
    pub fn last(&self) -> Option<&ApprovalRecord> {
        self.0.last()
    }

    /// Iterate the records in append order
    pub fn iter(&self) -> std::slice::Iter<'_, ApprovalRecord> {
        self.0.iter()
    }

    /// The records as a slice, oldest first
    #[inline]
    pub fn entries(&self) -> &[ApprovalRecord] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a ApprovalHistory {
    type Item = &'a ApprovalRecord;
    type IntoIter = std::slice::Iter<'a, ApprovalRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
