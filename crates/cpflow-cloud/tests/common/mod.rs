use cpflow_cloud::{Condition, StatusSnapshot, SubEntityStatus};
use tracing_subscriber::EnvFilter;

/// Route engine logs through the test harness (`RUST_LOG=debug` to see them)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn snapshot(condition: Condition) -> StatusSnapshot {
    StatusSnapshot::new(condition)
}

/// A completed workload identity with one role assignment and one service account
#[allow(dead_code)]
pub fn workload_identity(rbac: Condition, sa: Condition) -> StatusSnapshot {
    let mut role = SubEntityStatus::new("rbac-1", "roleAssignment", rbac);
    if rbac == Condition::Failed {
        role = role.with_reason("principal does not exist in tenant");
    }
    StatusSnapshot::new(Condition::Complete).with_sub_entity(
        SubEntityStatus::new("wi-1", "workloadIdentity", Condition::Complete)
            .with_child(role)
            .with_child(SubEntityStatus::new("sa-1", "serviceAccount", sa)),
    )
}
