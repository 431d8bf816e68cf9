//! SLURM accounting types.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Facility used when an account string carries no `facility:repo` pair.
pub const DEFAULT_FACILITY: &str = "shared";

/// Repo used when an account string carries no `facility:repo` pair.
pub const DEFAULT_REPO: &str = "default";

/// SLURM job state as reported by sacct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    OutOfMemory,
    NodeFail,
    Preempted,
    Unknown(String),
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        // sacct states can have suffixes like "CANCELLED by 12345"
        let base = s.split_whitespace().next().unwrap_or(s);
        match base.to_uppercase().as_str() {
            "PENDING" | "PD" => JobState::Pending,
            "RUNNING" | "R" => JobState::Running,
            "COMPLETED" | "CD" => JobState::Completed,
            "FAILED" | "F" => JobState::Failed,
            "CANCELLED" | "CA" => JobState::Cancelled,
            "TIMEOUT" | "TO" => JobState::Timeout,
            "OUT_OF_MEMORY" | "OOM" => JobState::OutOfMemory,
            "NODE_FAIL" | "NF" => JobState::NodeFail,
            "PREEMPTED" | "PR" => JobState::Preempted,
            other => JobState::Unknown(other.to_string()),
        }
    }
}

/// One job allocation line from sacct.
#[derive(Debug, Clone, PartialEq)]
pub struct JobAccountingRecord {
    /// SLURM job ID (may carry array/het suffixes such as `123_4`)
    pub job_id: String,

    /// Submitting user
    pub username: String,

    /// Numeric user ID
    pub uid: Option<u32>,

    /// Account string, normally `facility:repo`
    pub account: String,

    /// Partition, which names the cluster the job ran on
    pub partition: String,

    /// Quality of service
    pub qos: String,

    pub submit_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    /// Elapsed wall time as reported by sacct
    pub elapsed: Option<Duration>,

    /// Requested CPUs
    pub ncpus: u32,

    /// Allocated nodes
    pub alloc_nodes: u64,

    /// Allocated trackable resources, e.g. `cpu=64,mem=256G,gres/gpu=4`
    pub alloc_tres: String,

    /// CPU time in core-seconds
    pub cpu_time_raw: Option<u64>,

    pub nodelist: Option<String>,
    pub reservation: Option<String>,
    pub reservation_id: Option<String>,

    /// Job state; absent when the header has no State column
    pub state: Option<JobState>,
}

impl JobAccountingRecord {
    /// Split the account into `(facility, repo)`.
    ///
    /// Returns None when the account is not of the form `facility:repo`.
    pub fn facility_repo(&self) -> Option<(&str, &str)> {
        let (facility, repo) = self.account.split_once(':')?;
        if facility.is_empty() || repo.is_empty() || repo.contains(':') {
            return None;
        }
        Some((facility, repo))
    }

    /// Whether the job never started running.
    pub fn never_started(&self) -> bool {
        self.start_time.is_none() || self.state == Some(JobState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(account: &str) -> JobAccountingRecord {
        JobAccountingRecord {
            job_id: "1".to_string(),
            username: "alice".to_string(),
            uid: None,
            account: account.to_string(),
            partition: "roma".to_string(),
            qos: "normal".to_string(),
            submit_time: None,
            start_time: None,
            end_time: None,
            elapsed: None,
            ncpus: 1,
            alloc_nodes: 1,
            alloc_tres: String::new(),
            cpu_time_raw: None,
            nodelist: None,
            reservation: None,
            reservation_id: None,
            state: None,
        }
    }

    #[test]
    fn test_job_state_from_str() {
        assert_eq!(JobState::from("COMPLETED"), JobState::Completed);
        assert_eq!(JobState::from("CANCELLED by 12345"), JobState::Cancelled);
        assert_eq!(JobState::from("pending"), JobState::Pending);
        assert_eq!(
            JobState::from("REQUEUED"),
            JobState::Unknown("REQUEUED".to_string())
        );
    }

    #[test]
    fn test_facility_repo() {
        assert_eq!(record("lcls:xpp").facility_repo(), Some(("lcls", "xpp")));
        assert_eq!(record("lcls").facility_repo(), None);
        assert_eq!(record(":xpp").facility_repo(), None);
        assert_eq!(record("a:b:c").facility_repo(), None);
    }

    #[test]
    fn test_never_started() {
        let mut r = record("lcls:xpp");
        assert!(r.never_started());
        r.start_time = Some(Utc::now());
        assert!(!r.never_started());
        r.state = Some(JobState::Pending);
        assert!(r.never_started());
    }
}
