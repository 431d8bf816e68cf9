//! `coact facility-hold`

use crate::connect;
use coact_cli::{HoldArgs, Settings};
use coact_pipeline::{AdmissionOptions, run_admission};
use coact_slurm::Sacctmgr;
use miette::{IntoDiagnostic, Result};

pub async fn run(args: &HoldArgs, settings: &Settings) -> Result<()> {
    let backend = connect(settings)?;
    let scheduler = Sacctmgr::new(settings.sacctmgr.clone());
    let options = AdmissionOptions {
        threshold: settings.threshold,
        windows: settings.windows.clone(),
        dry_run: args.dry_run,
    };

    let report = run_admission(&backend, &scheduler, &options)
        .await
        .into_diagnostic()?;

    tracing::info!(
        "{} changed, {} unchanged, {} without association, {} failed",
        report.applied.len(),
        report.plan.unchanged,
        report.plan.undetermined.len(),
        report.failed.len()
    );
    Ok(())
}
