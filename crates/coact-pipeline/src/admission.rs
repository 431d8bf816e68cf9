//! Facility admission control.
//!
//! A facility that has used more than its share of a cluster recently is
//! held: its account's node cap on that partition is set to zero so no new
//! jobs start. Once usage drops back under the threshold the cap is cleared.
//! Only pairs whose state has to change get a scheduler command.

use coact_backend::{Backend, BackendError};
use coact_core::{HoldState, UsageSample};
use coact_parsers::CommandError;
use coact_slurm::{Association, NodeCap, Scheduler};
use thiserror::Error;

/// Lookback windows in minutes: 15 minutes, 1 hour, 1 week, about a month.
pub const DEFAULT_WINDOWS: [u32; 4] = [15, 60, 10080, 43800];
pub const DEFAULT_THRESHOLD: f64 = 100.0;

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Failed to fetch facility usage: {0}")]
    Backend(#[from] BackendError),
    #[error("Failed to read scheduler associations: {0}")]
    Associations(#[from] CommandError),
}

#[derive(Debug, Clone)]
pub struct AdmissionOptions {
    /// Percent used above which a facility is held
    pub threshold: f64,
    pub windows: Vec<u32>,
    /// Log commands instead of running them
    pub dry_run: bool,
}

impl Default for AdmissionOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            windows: DEFAULT_WINDOWS.to_vec(),
            dry_run: false,
        }
    }
}

/// Held iff any window is over the threshold.
pub fn desired_state(sample: &UsageSample, threshold: f64) -> HoldState {
    HoldState::from_held(sample.is_over(threshold))
}

/// The account-level association of a facility on a cluster.
fn find_association<'a>(
    associations: &'a [Association],
    facility: &str,
    cluster: &str,
) -> Option<&'a Association> {
    associations.iter().find(|a| {
        a.is_account_level()
            && a.account.eq_ignore_ascii_case(facility)
            && a
                .partition
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(cluster))
    })
}

/// A hold state change for one facility on one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Scheduler account, as spelled by sacctmgr
    pub account: String,
    pub partition: String,
    pub from: HoldState,
    pub to: HoldState,
}

impl Transition {
    pub fn cap(&self) -> NodeCap {
        match self.to {
            HoldState::Held => NodeCap::Blocked,
            HoldState::Open => NodeCap::Unlimited,
        }
    }
}

/// What one admission pass intends to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionPlan {
    pub transitions: Vec<Transition>,
    /// Pairs already in their desired state
    pub unchanged: usize,
    /// `(facility, cluster)` pairs with no account association
    pub undetermined: Vec<(String, String)>,
}

/// Compare desired against observed hold state for every usage sample.
pub fn plan(
    samples: &[UsageSample],
    associations: &[Association],
    threshold: f64,
) -> AdmissionPlan {
    let mut plan = AdmissionPlan::default();

    for sample in samples {
        let Some(assoc) = find_association(associations, &sample.facility, &sample.cluster) else {
            tracing::warn!(
                "No association for {} on {}, skipping",
                sample.facility,
                sample.cluster
            );
            plan.undetermined
                .push((sample.facility.clone(), sample.cluster.clone()));
            continue;
        };

        let observed = HoldState::from_held(assoc.is_held());
        let desired = desired_state(sample, threshold);
        tracing::debug!(
            "{} on {}: {:?} -> {} (currently {})",
            sample.facility,
            sample.cluster,
            sample.percents,
            desired,
            observed
        );

        if observed == desired {
            plan.unchanged += 1;
            continue;
        }
        plan.transitions.push(Transition {
            account: assoc.account.clone(),
            partition: sample.cluster.clone(),
            from: observed,
            to: desired,
        });
    }

    plan
}

/// Outcome of one admission pass.
#[derive(Debug, Default)]
pub struct AdmissionReport {
    pub plan: AdmissionPlan,
    /// Transitions carried out (or logged, in a dry run)
    pub applied: Vec<Transition>,
    pub failed: Vec<(Transition, CommandError)>,
}

/// Fetch usage and hold state, then issue commands for changed pairs.
///
/// A failed command is logged and recorded; the remaining pairs still run.
pub async fn run_admission(
    backend: &dyn Backend,
    scheduler: &dyn Scheduler,
    options: &AdmissionOptions,
) -> Result<AdmissionReport, AdmissionError> {
    let samples = backend.facility_usage(&options.windows).await?;
    tracing::info!(
        "Fetched usage for {} facility/cluster pairs over windows {:?}",
        samples.len(),
        options.windows
    );
    let associations = scheduler.associations().await?;

    let plan = plan(&samples, &associations, options.threshold);
    let mut report = AdmissionReport::default();

    for transition in &plan.transitions {
        let command = scheduler.describe_node_cap(
            &transition.account,
            &transition.partition,
            transition.cap(),
        );
        if options.dry_run {
            tracing::info!("Dry run: {}", command);
            report.applied.push(transition.clone());
            continue;
        }

        match scheduler
            .set_node_cap(&transition.account, &transition.partition, transition.cap())
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "{} on {} is now {}",
                    transition.account,
                    transition.partition,
                    transition.to
                );
                report.applied.push(transition.clone());
            }
            Err(e) => {
                tracing::error!("{} failed: {}", command, e);
                report.failed.push((transition.clone(), e));
            }
        }
    }

    report.plan = plan;
    Ok(report)
}
