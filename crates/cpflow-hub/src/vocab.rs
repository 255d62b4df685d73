//! Remote status vocabulary
//!
//! The hub reports progress with several overlapping string vocabularies
//! (`PROVISION_TASKSET_STATUS_COMPLETE`, `STATUS_FAILED`, `Success`, ...).
//! They are normalized here, once, into [`Condition`].

use cpflow_cloud::Condition;

const PREFIXES: [&str; 3] = ["PROVISION_TASKSET_STATUS_", "PROVISION_STATUS_", "STATUS_"];

/// Map a remote status string to a [`Condition`].
///
/// Matching is exact after upper-casing and stripping one known prefix.
/// Unknown values are treated as still pending.
pub fn condition_from(raw: &str) -> Condition {
    let upper = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
    let token = PREFIXES
        .iter()
        .find_map(|p| upper.strip_prefix(p))
        .unwrap_or(upper.as_str());

    match token {
        "COMPLETE" | "SUCCESS" | "OK" | "READY" => Condition::Complete,
        "FAILED" | "FAIL" | "FAILURE" => Condition::Failed,
        "IN_PROGRESS" | "RUNNING" | "PROVISIONING" => Condition::InProgress,
        "PENDING" => Condition::Pending,
        "SUBMITTED" => Condition::Submitted,
        "SKIPPED" => Condition::Skipped,
        "CANCELLED" | "CANCELED" => Condition::Cancelled,
        _ => {
            tracing::debug!(status = raw, "unknown remote status, treating as pending");
            Condition::Pending
        }
    }
}
