mod common;

use common::{init_tracing, snapshot, workload_identity};
use cpflow_cloud::testing::{ScriptedControlPlane, ScriptedError};
use cpflow_cloud::{
    CancellationToken, CloudError, Condition, DesiredSpec, FailurePolicy, GroupTask,
    OperationState, Options, Orchestrator, Phase, ResourceRef, StateManager, StatusSnapshot,
    SubEntityStatus, TaskStatus,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn options() -> Options {
    Options::new()
        .with_poll_interval(Duration::from_secs(5))
        .with_deadline(Duration::from_secs(60 * 60))
        .with_max_transient_failures(3)
}

fn wi_desired() -> DesiredSpec {
    DesiredSpec::new()
        .with_sub_entity("wi-1", "workloadIdentity")
        .with_sub_entity("rbac-1", "roleAssignment")
        .with_sub_entity("sa-1", "serviceAccount")
}

fn orchestrator(plane: &Arc<ScriptedControlPlane>, options: Options) -> Orchestrator<ScriptedControlPlane> {
    Orchestrator::new(plane.clone(), options).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_submitted_in_progress_complete() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_statuses([
        snapshot(Condition::Submitted),
        snapshot(Condition::InProgress),
        workload_identity(Condition::Complete, Condition::Complete),
    ]));
    let orchestrator = orchestrator(&plane, options());

    let result = orchestrator
        .apply(
            &wi_desired(),
            &ScriptedControlPlane::request("workload-identity", "wi-1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Complete);
    assert!(result.errors().is_empty());
    assert_eq!(plane.status_reads(), 3);
    assert!(result.into_result().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_role_assignment_behind_overall_complete() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_statuses([
        snapshot(Condition::InProgress),
        workload_identity(Condition::Failed, Condition::Complete),
    ]));
    let orchestrator = orchestrator(&plane, options());

    let result = orchestrator
        .apply(
            &wi_desired(),
            &ScriptedControlPlane::request("workload-identity", "wi-1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Failed);
    assert_eq!(result.errors().len(), 1);
    let failure = &result.errors()[0];
    assert_eq!(failure.entity_name, "rbac-1");
    assert_eq!(failure.entity_type, "roleAssignment");
    assert_eq!(failure.reason, "principal does not exist in tenant");
    assert!(result.render().contains("roleAssignment \"rbac-1\""));

    let err = result.into_result().unwrap_err();
    assert!(matches!(err, CloudError::ApiError(_)));
}

#[tokio::test(start_paused = true)]
async fn test_times_out_after_exactly_two_ticks() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::InProgress)));
    // two ticks
    let orchestrator = orchestrator(&plane, options().with_deadline(Duration::from_secs(10)));

    let start = Instant::now();
    let result = orchestrator
        .apply(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::TimedOut);
    assert_eq!(plane.status_reads(), 2);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    assert_eq!(
        result.last_snapshot().map(|s| s.condition),
        Some(Condition::InProgress)
    );
    assert!(matches!(result.into_result(), Err(CloudError::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn test_node_phase_reports_every_failure() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::Complete)));
    let orchestrator = orchestrator(&plane, options().with_task_retry(cpflow_cloud::RetryConfig::none()));

    let finished = Arc::new(AtomicUsize::new(0));
    let tasks = (1..=5u64).map(|i| {
        let finished = finished.clone();
        GroupTask::new(format!("node-{}", i), move || {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100 * i)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i % 2 == 0 {
                    Err(CloudError::ApiError(format!("approval of node-{} rejected", i)))
                } else {
                    Ok(())
                }
            }
        })
    });
    let phase = Phase::new("approve-nodes", "node").with_tasks(tasks);

    let result = orchestrator
        .apply_phased(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            vec![phase],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(finished.load(Ordering::SeqCst), 5);
    assert_eq!(result.state(), OperationState::Failed);
    let names: Vec<_> = result.errors().iter().map(|e| e.entity_name.as_str()).collect();
    assert_eq!(names, vec!["node-2", "node-4"]);
    assert!(result.errors().iter().all(|e| e.entity_type == "node"));
    // aborted before the final poll
    assert_eq!(plane.status_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_warn_policy_keeps_going_after_phase_failures() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::Complete)));
    let options = options()
        .with_failure_policy(FailurePolicy::Warn)
        .with_task_retry(cpflow_cloud::RetryConfig::none());
    let orchestrator = orchestrator(&plane, options);

    let phase = Phase::new("configure-nodes", "node")
        .with_task(GroupTask::new("node-1", || async { Ok(()) }))
        .with_task(GroupTask::new("node-2", || async {
            Err(CloudError::Transport("connection reset".into()))
        }));

    let result = orchestrator
        .apply_phased(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            vec![phase],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Complete);
    assert!(result.errors().is_empty());
    assert_eq!(result.warnings().len(), 1);
    assert_eq!(result.warnings()[0].entity_name, "node-2");
    assert_eq!(plane.status_reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_warn_policy_downgrades_partial_failure() {
    init_tracing();
    let plane = Arc::new(
        ScriptedControlPlane::new()
            .with_status(workload_identity(Condition::Failed, Condition::Complete)),
    );
    let orchestrator = orchestrator(&plane, options().with_failure_policy(FailurePolicy::Warn));

    let result = orchestrator
        .apply(
            &wi_desired(),
            &ScriptedControlPlane::request("workload-identity", "wi-1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Complete);
    assert!(result.errors().is_empty());
    assert_eq!(result.warnings()[0].entity_name, "rbac-1");
    assert!(result.render().contains("warnings:"));
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_is_a_noop_without_polling() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::Complete)));
    let orchestrator = orchestrator(&plane, options());
    let request = ScriptedControlPlane::request("cluster", "c1");
    let cancel = CancellationToken::new();

    let first = orchestrator.apply(&DesiredSpec::new(), &request, &cancel).await;
    assert_eq!(first.state(), OperationState::Complete);
    assert_eq!(plane.status_reads(), 1);

    let start = Instant::now();
    let second = orchestrator.apply(&DesiredSpec::new(), &request, &cancel).await;
    assert_eq!(second.state(), OperationState::Complete);
    assert!(second.errors().is_empty());
    assert_eq!(plane.status_reads(), 1);
    assert_eq!(plane.submit_count(), 2);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_noop_submit_skips_phases() {
    let plane = Arc::new(ScriptedControlPlane::new().with_noop_submit());
    let orchestrator = orchestrator(&plane, options());

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let phase = Phase::new("approve-nodes", "node").with_task(GroupTask::new("node-1", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    }));

    let result = orchestrator
        .apply_phased(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            vec![phase],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Complete);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(plane.status_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_undeclared_failures_are_never_reported() {
    init_tracing();
    let failing_extra = StatusSnapshot::new(Condition::Failed)
        .with_reason("taskset failed")
        .with_sub_entity(SubEntityStatus::new("wi-1", "workloadIdentity", Condition::Complete))
        .with_sub_entity(
            SubEntityStatus::new("unrelated", "roleAssignment", Condition::Failed)
                .with_reason("not ours"),
        );
    let plane = Arc::new(ScriptedControlPlane::new().with_status(failing_extra));
    let orchestrator = orchestrator(&plane, options());
    let desired = DesiredSpec::new().with_sub_entity("wi-1", "workloadIdentity");

    let result = orchestrator
        .apply(
            &desired,
            &ScriptedControlPlane::request("workload-identity", "wi-1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Failed);
    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].entity_name, "overall");
    assert_eq!(result.errors()[0].reason, "taskset failed");
    assert!(result.errors().iter().all(|e| e.entity_name != "unrelated"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_declared_entity_is_not_found() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(
        StatusSnapshot::new(Condition::Complete).with_task(
            TaskStatus::new("sync", Condition::Complete).with_child(SubEntityStatus::new(
                "ClusterReady",
                "condition",
                Condition::Complete,
            )),
        ),
    ));
    let orchestrator = orchestrator(&plane, options());
    let desired = DesiredSpec::new()
        .with_sub_entity("ClusterReady", "condition")
        .with_sub_entity("BlueprintSynced", "condition");

    let result = orchestrator
        .apply(
            &desired,
            &ScriptedControlPlane::request("cluster", "c1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Failed);
    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].entity_name, "BlueprintSynced");
    assert_eq!(result.errors()[0].reason, "not found in remote system");
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_tolerated() {
    init_tracing();
    let plane = Arc::new(
        ScriptedControlPlane::new()
            .with_status_error(ScriptedError::Transport("502 bad gateway".into()))
            .with_status_error(ScriptedError::Transport("502 bad gateway".into()))
            .with_status(snapshot(Condition::Complete)),
    );
    let orchestrator = orchestrator(&plane, options());

    let result = orchestrator
        .apply(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Complete);
    assert_eq!(plane.status_reads(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_errors_are_fatal() {
    init_tracing();
    let plane = Arc::new(
        ScriptedControlPlane::new()
            .with_status_error(ScriptedError::Transport("connection refused".into())),
    );
    let orchestrator = orchestrator(&plane, options());

    let result = orchestrator
        .apply(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Fatal);
    assert_eq!(plane.status_reads(), 3);
    assert!(result.errors()[0].reason.contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn test_submit_error_is_fatal() {
    let plane = Arc::new(
        ScriptedControlPlane::new().with_submit_error(ScriptedError::Api("403 forbidden".into())),
    );
    let orchestrator = orchestrator(&plane, options());

    let result = orchestrator
        .apply(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::Fatal);
    assert_eq!(result.errors()[0].entity_name, "c1");
    assert_eq!(result.errors()[0].entity_type, "cluster");
    assert_eq!(plane.status_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_ends_the_run() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::InProgress)));
    let orchestrator = orchestrator(&plane, options());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let result = orchestrator
        .apply(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            &cancel,
        )
        .await;

    assert_eq!(result.state(), OperationState::TimedOut);
    assert_eq!(plane.status_reads(), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_read_in_flight_at_deadline_is_abandoned() {
    let plane = Arc::new(
        ScriptedControlPlane::new()
            .with_read_delay(Duration::from_secs(4))
            .with_status(snapshot(Condition::Complete)),
    );
    let orchestrator = orchestrator(&plane, options().with_deadline(Duration::from_secs(7)));

    let start = Instant::now();
    let result = orchestrator
        .apply(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::TimedOut);
    assert!(result.last_snapshot().is_none());
    assert_eq!(start.elapsed(), Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_a_hung_phase() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::Complete)));
    let orchestrator = orchestrator(&plane, options().with_task_retry(cpflow_cloud::RetryConfig::none()));

    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    let phase = Phase::new("approve-nodes", "node").with_task(GroupTask::new("node-1", move || {
        let counter = counter.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(10 * 60 * 60)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let result = orchestrator
        .apply_phased(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            vec![phase],
            &cancel,
        )
        .await;

    assert_eq!(result.state(), OperationState::TimedOut);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(plane.status_reads(), 0);
    assert!(result.errors()[0].reason.contains("approve-nodes"));

    // the aborted member never finishes
    tokio::time::sleep(Duration::from_secs(11 * 60 * 60)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_phases_and_poll_share_one_deadline() {
    init_tracing();
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::InProgress)));
    let orchestrator = orchestrator(&plane, options().with_deadline(Duration::from_secs(20)));

    let phase = Phase::new("configure-nodes", "node").with_task(GroupTask::new("node-1", || async {
        tokio::time::sleep(Duration::from_secs(12)).await;
        Ok(())
    }));

    let start = Instant::now();
    let result = orchestrator
        .apply_phased(
            &DesiredSpec::new(),
            &ScriptedControlPlane::request("cluster", "c1"),
            vec![phase],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.state(), OperationState::TimedOut);
    // phase ends at 12s, the only read at 17s, the deadline at 20s
    assert_eq!(plane.status_reads(), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_delete_polls_until_gone() {
    init_tracing();
    let plane = Arc::new(
        ScriptedControlPlane::new()
            .with_lookup(Some(snapshot(Condition::InProgress)))
            .with_lookup(Some(snapshot(Condition::InProgress)))
            .with_lookup(None),
    );
    let orchestrator = orchestrator(&plane, options());
    let resource = ResourceRef::new("workload-identity", "defaultproject", "wi-1");

    let result = orchestrator.delete(&resource, &CancellationToken::new()).await;

    assert_eq!(result.state(), OperationState::Complete);
    assert_eq!(plane.delete_count(), 1);
    assert_eq!(plane.lookup_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delete_of_missing_resource_completes() {
    let plane = Arc::new(
        ScriptedControlPlane::new()
            .with_delete_error(ScriptedError::NotFound("cluster c1".into())),
    );
    let orchestrator = orchestrator(&plane, options());
    let resource = ResourceRef::new("cluster", "defaultproject", "c1");

    let result = orchestrator.delete(&resource, &CancellationToken::new()).await;

    assert_eq!(result.state(), OperationState::Complete);
    assert_eq!(plane.lookup_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_deletion_is_reported() {
    let plane = Arc::new(ScriptedControlPlane::new().with_lookup(Some(
        StatusSnapshot::new(Condition::Failed).with_reason("finalizer stuck on namespace"),
    )));
    let orchestrator = orchestrator(&plane, options());
    let resource = ResourceRef::new("cluster", "defaultproject", "c1");

    let result = orchestrator.delete(&resource, &CancellationToken::new()).await;

    assert_eq!(result.state(), OperationState::Failed);
    assert_eq!(result.errors()[0].reason, "finalizer stuck on namespace");
}

#[tokio::test(start_paused = true)]
async fn test_outcomes_are_recorded_in_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp_dir.path());
    let plane = Arc::new(ScriptedControlPlane::new().with_status(snapshot(Condition::Complete)));
    let orchestrator = orchestrator(&plane, options()).with_state(manager.clone());
    let request = ScriptedControlPlane::request("cluster", "c1");
    let cancel = CancellationToken::new();

    let result = orchestrator.apply(&DesiredSpec::new(), &request, &cancel).await;
    assert_eq!(result.state(), OperationState::Complete);

    let state = manager.load().await.unwrap();
    let record = state.get_record(&request.resource).unwrap();
    assert_eq!(record.state, OperationState::Complete);
    assert_eq!(record.handle.as_deref(), Some("ts-0001"));

    let deleted = orchestrator.delete(&request.resource, &cancel).await;
    assert_eq!(deleted.state(), OperationState::Complete);
    assert!(manager.load().await.unwrap().get_record(&request.resource).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes_to_json() {
    let plane = Arc::new(
        ScriptedControlPlane::new()
            .with_status(workload_identity(Condition::Complete, Condition::Failed)),
    );
    let orchestrator = orchestrator(&plane, options());

    let result = orchestrator
        .apply(
            &wi_desired(),
            &ScriptedControlPlane::request("workload-identity", "wi-1"),
            &CancellationToken::new(),
        )
        .await;

    let json: serde_json::Value = serde_json::from_str(&result.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["state"], "failed");
    assert_eq!(json["errors"][0]["entityName"], "sa-1");
    assert_eq!(json["errors"][0]["entityType"], "serviceAccount");
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_run_resumes_from_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let manager = StateManager::new(temp_dir.path());
    let plane = Arc::new(ScriptedControlPlane::new().with_statuses([
        snapshot(Condition::InProgress),
        snapshot(Condition::InProgress),
        snapshot(Condition::Complete),
    ]));
    let orchestrator = orchestrator(&plane, options().with_deadline(Duration::from_secs(12)))
        .with_state(manager.clone());
    let request = ScriptedControlPlane::request("cluster", "c1");
    let cancel = CancellationToken::new();

    let first = orchestrator.apply(&DesiredSpec::new(), &request, &cancel).await;
    assert_eq!(first.state(), OperationState::TimedOut);

    let state = manager.load().await.unwrap();
    let record = state.get_record(&request.resource).unwrap();
    assert!(record.is_resumable());
    let handle = record.handle().unwrap();

    let resumed = orchestrator.wait(&handle, &DesiredSpec::new(), &cancel).await;
    assert_eq!(resumed.state(), OperationState::Complete);
    assert_eq!(plane.submit_count(), 1);
    assert_eq!(plane.status_reads(), 3);
}
