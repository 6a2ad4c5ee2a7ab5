use crate::domain::condition::AutoCondition;
use crate::domain::instance::{ActorId, StepId, WorkflowId};
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// What a step requires before the instance can move past it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A human decision is required
    #[default]
    Approval,

    /// Informational only; completes without a human decision
    Notification,
}

/// One ordered stage within a workflow template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// ID of the step, never reused
    pub id: StepId,

    /// Human-readable name of the step
    pub name: String,

    /// Position in the sequence; unique within the owning workflow
    pub order: u32,

    /// Step kind
    #[serde(default)]
    pub kind: StepKind,

    /// Role whose members may approve this step, if any
    pub approver_role: Option<String>,

    /// Identities explicitly allowed to approve this step
    #[serde(default)]
    pub approver_users: Vec<ActorId>,

    /// Days allowed for this step; refreshes the instance due date
    /// when the step becomes current
    pub sla_days: Option<u32>,

    /// Optional rule that lets the step complete without a human
    pub auto_condition: Option<AutoCondition>,
}

impl WorkflowStep {
    /// Create an approval step with no approver constraints
    pub fn new(id: StepId, name: impl Into<String>, order: u32) -> Self {
        Self {
            id,
            name: name.into(),
            order,
            kind: StepKind::Approval,
            approver_role: None,
            approver_users: Vec::new(),
            sla_days: None,
            auto_condition: None,
        }
    }

    /// Whether the given identity may approve this step
    ///
    /// Matches either the step's approver role against the roles the
    /// caller asserts for the actor, or the actor against the explicit
    /// approver list. A step with neither constraint accepts anyone.
    pub fn is_approver(&self, actor: &ActorId, roles: &[String]) -> bool {
        if self.approver_role.is_none() && self.approver_users.is_empty() {
            return true;
        }

        if let Some(role) = &self.approver_role {
            if roles.iter().any(|r| r == role) {
                return true;
            }
        }

        self.approver_users.contains(actor)
    }
}

/// Reusable ordered template of approval steps for one entity category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// ID of the workflow
    pub id: WorkflowId,

    /// Human-readable name of the workflow
    pub name: String,

    /// Description of the workflow
    pub description: Option<String>,

    /// Category of business record this template applies to, e.g. "Risk"
    pub entity_type: String,

    /// Whether new instances may be started from this template
    pub is_active: bool,

    /// The steps in this workflow
    pub steps: Vec<WorkflowStep>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an active workflow with no steps
    pub fn new(id: WorkflowId, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: None,
            entity_type: entity_type.into(),
            is_active: true,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the template
    ///
    /// An empty step list is legal here so a workflow can be authored
    /// incrementally; startability is checked when an instance starts.
    pub fn validate(&self) -> Result<(), CoreError> {
        // Check for step ID uniqueness
        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(&step.id) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate step ID: {}",
                    step.id.0
                )));
            }
        }

        self.ensure_unique_orders()?;

        Ok(())
    }

    /// The order value a newly appended step receives
    pub fn next_order(&self) -> u32 {
        self.steps.iter().map(|s| s.order).max().map_or(1, |m| m + 1)
    }

    /// Append a step at the end of the sequence
    ///
    /// The step's order is overwritten with the next sequential value.
    pub fn append_step(&mut self, mut step: WorkflowStep) -> Result<StepId, CoreError> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(CoreError::ValidationError(format!(
                "Duplicate step ID: {}",
                step.id.0
            )));
        }

        step.order = self.next_order();
        let id = step.id.clone();
        self.steps.push(step);
        self.touch();
        Ok(id)
    }

    /// Insert a step at an explicit order value
    pub fn insert_step(&mut self, step: WorkflowStep) -> Result<StepId, CoreError> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(CoreError::ValidationError(format!(
                "Duplicate step ID: {}",
                step.id.0
            )));
        }

        if self.steps.iter().any(|s| s.order == step.order) {
            return Err(CoreError::OrderConflict(format!(
                "Order {} is already taken in workflow {}",
                step.order, self.id.0
            )));
        }

        let id = step.id.clone();
        self.steps.push(step);
        self.touch();
        Ok(id)
    }

    /// Remove a step, returning it if it was present
    ///
    /// Remaining steps keep their order values; gaps in the sequence
    /// are legal.
    pub fn remove_step(&mut self, id: &StepId) -> Option<WorkflowStep> {
        let pos = self.steps.iter().position(|s| &s.id == id)?;
        let step = self.steps.remove(pos);
        self.touch();
        Some(step)
    }

    /// Reassign order values 1..=n following the given id sequence
    ///
    /// The list must name every step of the workflow exactly once.
    pub fn reorder_steps(&mut self, ordered_ids: &[StepId]) -> Result<(), CoreError> {
        if ordered_ids.len() != self.steps.len() {
            return Err(CoreError::ValidationError(format!(
                "Reorder list names {} steps but workflow {} has {}",
                ordered_ids.len(),
                self.id.0,
                self.steps.len()
            )));
        }

        let mut seen = HashSet::new();
        for id in ordered_ids {
            if !seen.insert(id) {
                return Err(CoreError::ValidationError(format!(
                    "Reorder list names step {} twice",
                    id.0
                )));
            }
            if !self.steps.iter().any(|s| &s.id == id) {
                return Err(CoreError::ValidationError(format!(
                    "Step {} does not belong to workflow {}",
                    id.0, self.id.0
                )));
            }
        }

        for step in &mut self.steps {
            // Membership was checked above, so the position exists
            if let Some(pos) = ordered_ids.iter().position(|id| id == &step.id) {
                step.order = pos as u32 + 1;
            }
        }

        self.touch();
        Ok(())
    }

    /// Look up a step by id
    #[inline]
    pub fn step(&self, id: &StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// The step an instance starts on: lowest order value
    pub fn first_step(&self) -> Result<Option<&WorkflowStep>, CoreError> {
        self.ensure_unique_orders()?;
        Ok(self.steps.iter().min_by_key(|s| s.order))
    }

    /// The step after the given order that is not yet completed
    pub fn next_step_after(
        &self,
        order: u32,
        completed: &BTreeSet<StepId>,
    ) -> Result<Option<&WorkflowStep>, CoreError> {
        self.ensure_unique_orders()?;
        Ok(self
            .steps
            .iter()
            .filter(|s| s.order > order && !completed.contains(&s.id))
            .min_by_key(|s| s.order))
    }

    /// Stop new instances from starting; running instances are unaffected
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.touch();
    }

    /// Allow new instances to start again
    pub fn activate(&mut self) {
        self.is_active = true;
        self.touch();
    }

    // Duplicate orders make the sequence ambiguous; detect, never
    // silently resolve.
    fn ensure_unique_orders(&self) -> Result<(), CoreError> {
        let mut orders = HashSet::new();
        for step in &self.steps {
            if !orders.insert(step.order) {
                return Err(CoreError::OrderConflict(format!(
                    "Duplicate step order {} in workflow {}",
                    step.order, self.id.0
                )));
            }
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow() -> Workflow {
        Workflow::new(
            WorkflowId("risk-approval".to_string()),
            "Risk approval",
            "Risk",
        )
    }

    fn step(id: &str, order: u32) -> WorkflowStep {
        WorkflowStep::new(StepId(id.to_string()), format!("Step {}", id), order)
    }

    #[test]
    fn test_append_assigns_next_order() {
        let mut wf = workflow();
        wf.append_step(step("a", 0)).unwrap();
        wf.append_step(step("b", 0)).unwrap();

        assert_eq!(wf.step(&StepId("a".to_string())).unwrap().order, 1);
        assert_eq!(wf.step(&StepId("b".to_string())).unwrap().order, 2);
    }

    #[test]
    fn test_append_after_removal_leaves_gap() {
        let mut wf = workflow();
        wf.append_step(step("a", 0)).unwrap();
        wf.append_step(step("b", 0)).unwrap();
        wf.append_step(step("c", 0)).unwrap();

        // Removing the middle step must not renumber the others
        wf.remove_step(&StepId("b".to_string())).unwrap();
        assert_eq!(wf.step(&StepId("a".to_string())).unwrap().order, 1);
        assert_eq!(wf.step(&StepId("c".to_string())).unwrap().order, 3);

        // The next append continues past the highest survivor
        wf.append_step(step("d", 0)).unwrap();
        assert_eq!(wf.step(&StepId("d".to_string())).unwrap().order, 4);
    }

    #[test]
    fn test_insert_step_rejects_taken_order() {
        let mut wf = workflow();
        wf.insert_step(step("a", 5)).unwrap();

        let result = wf.insert_step(step("b", 5));
        assert!(matches!(result, Err(CoreError::OrderConflict(_))));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let mut wf = workflow();
        wf.append_step(step("a", 0)).unwrap();

        let result = wf.append_step(step("a", 0));
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_first_step_is_minimum_order() {
        let mut wf = workflow();
        wf.insert_step(step("late", 30)).unwrap();
        wf.insert_step(step("early", 10)).unwrap();
        wf.insert_step(step("middle", 20)).unwrap();

        let first = wf.first_step().unwrap().unwrap();
        assert_eq!(first.id.0, "early");
    }

    #[test]
    fn test_first_step_empty_workflow() {
        let wf = workflow();
        assert!(wf.first_step().unwrap().is_none());
    }

    #[test]
    fn test_next_step_skips_completed() {
        let mut wf = workflow();
        wf.insert_step(step("a", 1)).unwrap();
        wf.insert_step(step("b", 2)).unwrap();
        wf.insert_step(step("c", 3)).unwrap();

        let mut completed = BTreeSet::new();
        completed.insert(StepId("b".to_string()));

        let next = wf.next_step_after(1, &completed).unwrap().unwrap();
        assert_eq!(next.id.0, "c");

        let none = wf.next_step_after(3, &completed).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_duplicate_order_fails_sequencing() {
        let mut wf = workflow();
        // Bypass insert_step to build a corrupted template
        wf.steps.push(step("a", 1));
        wf.steps.push(step("b", 1));

        assert!(matches!(wf.first_step(), Err(CoreError::OrderConflict(_))));
        assert!(matches!(
            wf.next_step_after(0, &BTreeSet::new()),
            Err(CoreError::OrderConflict(_))
        ));
        assert!(matches!(wf.validate(), Err(CoreError::OrderConflict(_))));
    }

    #[test]
    fn test_reorder_steps() {
        let mut wf = workflow();
        wf.append_step(step("a", 0)).unwrap();
        wf.append_step(step("b", 0)).unwrap();
        wf.append_step(step("c", 0)).unwrap();

        wf.reorder_steps(&[
            StepId("c".to_string()),
            StepId("a".to_string()),
            StepId("b".to_string()),
        ])
        .unwrap();

        assert_eq!(wf.step(&StepId("c".to_string())).unwrap().order, 1);
        assert_eq!(wf.step(&StepId("a".to_string())).unwrap().order, 2);
        assert_eq!(wf.step(&StepId("b".to_string())).unwrap().order, 3);
    }

    #[test]
    fn test_reorder_rejects_unknown_and_incomplete_lists() {
        let mut wf = workflow();
        wf.append_step(step("a", 0)).unwrap();
        wf.append_step(step("b", 0)).unwrap();

        let unknown = wf.reorder_steps(&[StepId("a".to_string()), StepId("x".to_string())]);
        assert!(matches!(unknown, Err(CoreError::ValidationError(_))));

        let incomplete = wf.reorder_steps(&[StepId("a".to_string())]);
        assert!(matches!(incomplete, Err(CoreError::ValidationError(_))));

        let duplicated = wf.reorder_steps(&[StepId("a".to_string()), StepId("a".to_string())]);
        assert!(matches!(duplicated, Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_is_approver_matching() {
        let mut s = step("a", 1);
        s.approver_role = Some("ROLE_MANAGER".to_string());
        s.approver_users = vec![ActorId("bob".to_string())];

        let alice = ActorId("alice".to_string());
        let bob = ActorId("bob".to_string());

        // Role match
        assert!(s.is_approver(&alice, &["ROLE_MANAGER".to_string()]));
        // Explicit user match, no role needed
        assert!(s.is_approver(&bob, &[]));
        // Neither
        assert!(!s.is_approver(&alice, &["ROLE_VIEWER".to_string()]));

        // Unconstrained steps accept anyone
        let open = step("b", 2);
        assert!(open.is_approver(&alice, &[]));
    }

    #[test]
    fn test_deactivate_and_activate() {
        let mut wf = workflow();
        assert!(wf.is_active);

        wf.deactivate();
        assert!(!wf.is_active);

        wf.activate();
        assert!(wf.is_active);
    }

    #[test]
    fn test_step_kind_defaults_to_approval_on_deserialize() {
        let json = r#"{
            "id": "s1",
            "name": "Review",
            "order": 1,
            "approver_role": null,
            "sla_days": null,
            "auto_condition": null
        }"#;

        let step: WorkflowStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.kind, StepKind::Approval);
        assert!(step.approver_users.is_empty());
    }
}
