use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;
use signoff_core::domain::repository::memory::{
    MemoryInstanceRepository, MemoryWorkflowRepository,
};
use signoff_core::{
    ActorId, AutoCondition, CoreError, DataPacket, Decision, EntityRef, HistoryAction, InstanceId,
    InstanceRepository, InstanceStatus, NoopEventHandler, StepId, StepKind, Workflow,
    WorkflowEngine, WorkflowId, WorkflowRepository, WorkflowStep,
};
use std::sync::Arc;

/// Initialize tracing for tests with a default configuration
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("signoff_core=debug")
        .try_init();
}

fn engine_with_repos() -> (
    WorkflowEngine,
    Arc<MemoryWorkflowRepository>,
    Arc<MemoryInstanceRepository>,
) {
    let workflow_repo = Arc::new(MemoryWorkflowRepository::new());
    let instance_repo = Arc::new(MemoryInstanceRepository::new());
    let engine = WorkflowEngine::with_repositories(
        workflow_repo.clone(),
        instance_repo.clone(),
        Arc::new(NoopEventHandler),
    );
    (engine, workflow_repo, instance_repo)
}

fn step(id: &str, name: &str, order: u32) -> WorkflowStep {
    WorkflowStep::new(StepId(id.to_string()), name, order)
}

fn review_chain_workflow() -> Workflow {
    let mut wf = Workflow::new(
        WorkflowId("risk-review".to_string()),
        "Risk review",
        "Risk",
    );
    let mut manager = step("manager", "Manager review", 1);
    manager.approver_role = Some("manager".to_string());
    let mut security = step("security", "Security review", 2);
    security.approver_role = Some("security".to_string());
    let mut ciso = step("ciso", "CISO signoff", 3);
    ciso.approver_role = Some("ciso".to_string());
    wf.insert_step(manager).unwrap();
    wf.insert_step(security).unwrap();
    wf.insert_step(ciso).unwrap();
    wf
}

#[tokio::test]
async fn three_reviewers_take_an_instance_to_approval() -> Result<()> {
    init_test_tracing();
    let (engine, _, instance_repo) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;

    let instance_id = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 101),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    let summary = engine.instance_summary(&instance_id).await?;
    assert_eq!(summary.status, InstanceStatus::Pending);
    assert_eq!(summary.current_step.as_deref(), Some("manager"));
    assert_eq!(summary.progress, 0);

    engine
        .approve_step(
            &instance_id,
            ActorId("mia".to_string()),
            Some("within appetite".to_string()),
        )
        .await?;
    let summary = engine
        .approve_step(&instance_id, ActorId("sam".to_string()), None)
        .await?;
    assert_eq!(summary.status, InstanceStatus::InProgress);
    assert_eq!(summary.progress, 67);
    assert_eq!(summary.current_step.as_deref(), Some("ciso"));

    let summary = engine
        .approve_step(
            &instance_id,
            ActorId("cleo".to_string()),
            Some("approved".to_string()),
        )
        .await?;
    assert_eq!(summary.status, InstanceStatus::Approved);
    assert_eq!(summary.progress, 100);
    assert_eq!(summary.current_step, None);

    // The audit trail names every reviewer in order
    let instance = instance_repo.find_by_id(&instance_id).await?.unwrap();
    let actors: Vec<&str> = instance
        .approval_history
        .iter()
        .map(|r| r.actor.0.as_str())
        .collect();
    assert_eq!(actors, vec!["mia", "sam", "cleo"]);
    assert!(instance.completed_at.is_some());
    assert_eq!(instance.version, 4);

    Ok(())
}

#[tokio::test]
async fn rejection_is_terminal() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;

    let instance_id = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 7),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    engine
        .approve_step(&instance_id, ActorId("mia".to_string()), None)
        .await?;
    let summary = engine
        .reject_step(
            &instance_id,
            ActorId("sam".to_string()),
            Some("mitigations are incomplete".to_string()),
        )
        .await?;
    assert_eq!(summary.status, InstanceStatus::Rejected);
    assert_eq!(summary.current_step, None);

    // No further decision is accepted
    let refused = engine
        .approve_step(&instance_id, ActorId("cleo".to_string()), None)
        .await;
    assert!(matches!(refused, Err(CoreError::InvalidTransition(_))));

    let refused = engine
        .cancel_instance(&instance_id, ActorId("admin".to_string()), None)
        .await;
    assert!(matches!(refused, Err(CoreError::InvalidTransition(_))));

    Ok(())
}

#[tokio::test]
async fn cancellation_leaves_an_audit_record() -> Result<()> {
    init_test_tracing();
    let (engine, _, instance_repo) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;

    let instance_id = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 8),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    let summary = engine
        .cancel_instance(
            &instance_id,
            ActorId("admin".to_string()),
            Some("risk was merged into RISK-99".to_string()),
        )
        .await?;
    assert_eq!(summary.status, InstanceStatus::Cancelled);

    let instance = instance_repo.find_by_id(&instance_id).await?.unwrap();
    let record = instance.approval_history.last().unwrap();
    assert_eq!(record.action, HistoryAction::Cancelled);
    assert_eq!(record.step_id, Some(StepId("manager".to_string())));
    assert_eq!(record.comment.as_deref(), Some("risk was merged into RISK-99"));

    Ok(())
}

#[tokio::test]
async fn concurrent_decisions_hit_the_version_gate() -> Result<()> {
    init_test_tracing();
    let (engine, workflow_repo, instance_repo) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;

    let instance_id = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 55),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    // Two reviewers load the same instance state
    let workflow = workflow_repo
        .find_by_id(&WorkflowId("risk-review".to_string()))
        .await?
        .unwrap();
    let mut first = instance_repo.find_by_id(&instance_id).await?.unwrap();
    let mut second = instance_repo.find_by_id(&instance_id).await?.unwrap();

    first.advance(
        &workflow,
        ActorId("mia".to_string()),
        Decision::Approve,
        None,
    )?;
    instance_repo.save(&first).await?;

    // The second decision was made against stale state and must lose
    second.advance(
        &workflow,
        ActorId("sam".to_string()),
        Decision::Reject,
        None,
    )?;
    let lost = instance_repo.save(&second).await;
    assert!(matches!(lost, Err(CoreError::Conflict(_))));

    let stored = instance_repo.find_by_id(&instance_id).await?.unwrap();
    assert_eq!(stored.status, InstanceStatus::InProgress);
    assert_eq!(stored.approval_history.len(), 1);

    Ok(())
}

#[tokio::test]
async fn notification_then_condition_then_human() -> Result<()> {
    init_test_tracing();
    let (engine, _, instance_repo) = engine_with_repos();

    let mut wf = Workflow::new(
        WorkflowId("incident-response".to_string()),
        "Incident response",
        "Incident",
    );
    let mut notify = step("notify", "Notify stakeholders", 1);
    notify.kind = StepKind::Notification;
    let mut triage = step("triage", "Triage complete", 2);
    triage.auto_condition = Some(AutoCondition::FieldCompletion {
        fields: vec!["root_cause".to_string(), "severity".to_string()],
        condition: None,
    });
    let closure = step("closure", "Closure approval", 3);
    wf.insert_step(notify).unwrap();
    wf.insert_step(triage).unwrap();
    wf.insert_step(closure).unwrap();
    engine.deploy_workflow(wf).await?;

    let entity = EntityRef::new("Incident", 12);
    let instance_id = engine
        .start_workflow(
            WorkflowId("incident-response".to_string()),
            entity.clone(),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    // The notification step needed nobody; the condition step waits
    let summary = engine.instance_summary(&instance_id).await?;
    assert_eq!(summary.current_step.as_deref(), Some("triage"));

    // A half-filled incident does not satisfy the field gate
    let snapshot = DataPacket::new(json!({"root_cause": "expired cert", "severity": null}));
    let moved = engine.check_auto_progression(&entity, &snapshot).await?;
    assert!(moved.is_empty());

    // Filling in both fields lets the step auto-approve
    let snapshot = DataPacket::new(json!({"root_cause": "expired cert", "severity": "high"}));
    let moved = engine.check_auto_progression(&entity, &snapshot).await?;
    assert_eq!(moved, vec![instance_id.clone()]);

    let summary = engine.instance_summary(&instance_id).await?;
    assert_eq!(summary.current_step.as_deref(), Some("closure"));

    engine
        .approve_step(&instance_id, ActorId("ops-lead".to_string()), None)
        .await?;

    let instance = instance_repo.find_by_id(&instance_id).await?.unwrap();
    assert_eq!(instance.status, InstanceStatus::Approved);
    let actions: Vec<HistoryAction> = instance
        .approval_history
        .iter()
        .map(|r| r.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            HistoryAction::NotificationSent,
            HistoryAction::AutoApproved,
            HistoryAction::Approved,
        ]
    );

    Ok(())
}

#[tokio::test]
async fn expression_conditions_gate_auto_approval() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();

    let mut wf = Workflow::new(
        WorkflowId("expr-gate".to_string()),
        "Expression gate",
        "Risk",
    );
    let mut gated = step("gate", "Auto gate", 1);
    gated.auto_condition = Some(AutoCondition::Auto {
        condition: Some("(severity >= 3 AND status = reviewed) OR escalated = true".to_string()),
    });
    wf.insert_step(gated).unwrap();
    wf.insert_step(step("final", "Final approval", 2)).unwrap();
    engine.deploy_workflow(wf).await?;

    let entity = EntityRef::new("Risk", 31);
    let instance_id = engine
        .start_workflow(
            WorkflowId("expr-gate".to_string()),
            entity.clone(),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    // Neither branch of the expression holds yet
    let snapshot = DataPacket::new(json!({"severity": 2, "status": "reviewed"}));
    assert!(engine
        .check_auto_progression(&entity, &snapshot)
        .await?
        .is_empty());

    // The escalation branch alone is enough
    let snapshot = DataPacket::new(json!({"severity": 1, "escalated": true}));
    let moved = engine.check_auto_progression(&entity, &snapshot).await?;
    assert_eq!(moved, vec![instance_id.clone()]);

    let summary = engine.instance_summary(&instance_id).await?;
    assert_eq!(summary.current_step.as_deref(), Some("final"));

    Ok(())
}

#[tokio::test]
async fn timed_steps_fire_on_the_sweep() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();

    let mut wf = Workflow::new(
        WorkflowId("sla-escalation".to_string()),
        "SLA escalation",
        "Control",
    );
    let mut waiting = step("waiting", "Waiting period", 1);
    waiting.auto_condition = Some(AutoCondition::TimeBased {
        delay: "2 days".to_string(),
        condition: None,
    });
    wf.insert_step(waiting).unwrap();
    wf.insert_step(step("confirm", "Confirm closure", 2)).unwrap();
    engine.deploy_workflow(wf).await?;

    let instance_id = engine
        .start_workflow(
            WorkflowId("sla-escalation".to_string()),
            EntityRef::new("Control", 3),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    // Not due yet
    let moved = engine.process_due_steps(Utc::now()).await?;
    assert!(moved.is_empty());

    // Past the configured delay the step completes on its own
    let moved = engine
        .process_due_steps(Utc::now() + Duration::days(3))
        .await?;
    assert_eq!(moved, vec![instance_id.clone()]);

    let summary = engine.instance_summary(&instance_id).await?;
    assert_eq!(summary.current_step.as_deref(), Some("confirm"));

    Ok(())
}

#[tokio::test]
async fn approval_queues_follow_the_current_step() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;

    let first = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 1),
            ActorId("alice".to_string()),
            None,
        )
        .await?;
    let second = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 2),
            ActorId("bob".to_string()),
            None,
        )
        .await?;

    let mia = ActorId("mia".to_string());
    let queue = engine
        .pending_approvals_for(&mia, &["manager".to_string()])
        .await?;
    assert_eq!(queue.len(), 2);

    // Mia clears one instance; her queue shrinks, the security queue grows
    engine.approve_step(&first, mia.clone(), None).await?;

    let queue = engine
        .pending_approvals_for(&mia, &["manager".to_string()])
        .await?;
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, second.0);

    let security_queue = engine
        .pending_approvals_for(&ActorId("sam".to_string()), &["security".to_string()])
        .await?;
    assert_eq!(security_queue.len(), 1);
    assert_eq!(security_queue[0].id, first.0);

    // Without a matching role there is nothing to approve
    let empty = engine.pending_approvals_for(&mia, &[]).await?;
    assert!(empty.is_empty());

    Ok(())
}

#[tokio::test]
async fn entity_start_is_idempotent_while_in_flight() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;
    let entity = EntityRef::new("Risk", 77);

    let first = engine
        .start_for_entity(entity.clone(), None, ActorId("alice".to_string()), None)
        .await?;
    let again = engine
        .start_for_entity(entity.clone(), None, ActorId("bob".to_string()), None)
        .await?;
    assert_eq!(first, again);

    engine
        .cancel_instance(&first, ActorId("admin".to_string()), None)
        .await?;
    let fresh = engine
        .start_for_entity(entity, None, ActorId("alice".to_string()), None)
        .await?;
    assert_ne!(first, fresh);

    Ok(())
}

#[tokio::test]
async fn overdue_instances_show_up_until_finished() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;

    let overdue_id = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 40),
            ActorId("alice".to_string()),
            Some(Utc::now() - Duration::days(2)),
        )
        .await?;
    let on_time_id = engine
        .start_workflow(
            WorkflowId("risk-review".to_string()),
            EntityRef::new("Risk", 41),
            ActorId("alice".to_string()),
            Some(Utc::now() + Duration::days(14)),
        )
        .await?;

    let summary = engine.instance_summary(&overdue_id).await?;
    assert!(summary.is_overdue);
    let summary = engine.instance_summary(&on_time_id).await?;
    assert!(!summary.is_overdue);

    let overdue = engine.overdue_instances().await?;
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, overdue_id.0);

    // Terminal instances are never reported overdue
    engine
        .cancel_instance(&overdue_id, ActorId("admin".to_string()), None)
        .await?;
    assert!(engine.overdue_instances().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn editing_the_template_under_a_running_instance() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;
    let workflow_id = WorkflowId("risk-review".to_string());

    let instance_id = engine
        .start_workflow(
            workflow_id.clone(),
            EntityRef::new("Risk", 9),
            ActorId("alice".to_string()),
            None,
        )
        .await?;

    // Appending a step mid-flight stretches the remaining work
    engine
        .add_step(&workflow_id, step("board", "Board signoff", 0))
        .await?;
    let stored = engine.get_workflow(&workflow_id).await?;
    assert_eq!(stored.steps.len(), 4);
    let board = stored.step(&StepId("board".to_string())).unwrap();
    assert_eq!(board.order, 4);

    engine
        .approve_step(&instance_id, ActorId("mia".to_string()), None)
        .await?;
    let summary = engine.instance_summary(&instance_id).await?;
    assert_eq!(summary.progress, 25);

    // Removing the step the instance stands on leaves it unresolvable
    engine
        .remove_step(&workflow_id, &StepId("security".to_string()))
        .await?;
    let refused = engine
        .approve_step(&instance_id, ActorId("sam".to_string()), None)
        .await;
    assert!(matches!(refused, Err(CoreError::NoCurrentStep(_))));

    Ok(())
}

#[tokio::test]
async fn instance_ids_are_unique_per_start() -> Result<()> {
    init_test_tracing();
    let (engine, _, _) = engine_with_repos();
    engine.deploy_workflow(review_chain_workflow()).await?;

    let mut seen: Vec<InstanceId> = Vec::new();
    for n in 0..5 {
        let id = engine
            .start_workflow(
                WorkflowId("risk-review".to_string()),
                EntityRef::new("Risk", 200 + n),
                ActorId("alice".to_string()),
                None,
            )
            .await?;
        assert!(!seen.contains(&id));
        seen.push(id);
    }

    Ok(())
}
