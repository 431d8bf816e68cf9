//! Query SLURM job accounting via sacct.

use chrono::NaiveDate;
use coact_parsers::{CommandError, CommandLines, QuantityError, spawn_lines};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum SacctError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Failed to read accounting input: {0}")]
    Io(String),
    #[error("Accounting input has no header line")]
    MissingHeader,
    #[error("Accounting header is missing column {0:?}")]
    MissingColumn(&'static str),
    #[error("Job {job_id}: bad {field} value: {source}")]
    Quantity {
        job_id: String,
        field: &'static str,
        source: QuantityError,
    },
}

/// sacct output format (--parsable2 uses | delimiter)
pub const SACCT_FORMAT: &str = "JobID,User,UID,Account,Partition,QOS,Submit,Start,End,Elapsed,NCPUS,AllocNodes,AllocTRES,CPUTimeRAW,NodeList,Reservation,ReservationId,State";

/// A single-day window of job allocations to pull from sacct.
#[derive(Debug, Clone)]
pub struct SacctQuery {
    /// Path or name of the sacct binary
    pub sacct_bin: String,
    /// Day to import
    pub date: NaiveDate,
    /// Start of the window within the day, `HH:MM:SS`
    pub start_time: String,
    /// End of the window within the day, `HH:MM:SS`
    pub end_time: String,
}

impl SacctQuery {
    pub fn for_day(date: NaiveDate) -> Self {
        Self {
            sacct_bin: "sacct".to_string(),
            date,
            start_time: "00:00:00".to_string(),
            end_time: "23:59:59".to_string(),
        }
    }

    /// Arguments passed to sacct, excluding the binary.
    pub fn args(&self) -> Vec<String> {
        let day = self.date.format("%Y-%m-%d");
        vec![
            "--allusers".to_string(),
            "--duplicates".to_string(),
            "--allclusters".to_string(),
            "--allocations".to_string(),
            format!("--starttime={}T{}", day, self.start_time),
            format!("--endtime={}T{}", day, self.end_time),
            "--truncate".to_string(),
            "--parsable2".to_string(),
            format!("--format={}", SACCT_FORMAT),
        ]
    }

    /// Build the sacct command. Timestamps are requested as epoch seconds.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.sacct_bin);
        cmd.env("SLURM_TIME_FORMAT", "%s").args(self.args());
        cmd
    }

    /// Start sacct and stream its output.
    pub fn spawn(&self) -> Result<CommandLines, SacctError> {
        tracing::info!("Running {} {}", self.sacct_bin, self.args().join(" "));
        Ok(spawn_lines(&mut self.command(), "sacct")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_cover_day_window() {
        let mut query = SacctQuery::for_day(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        query.end_time = "12:00:00".to_string();
        let args = query.args();

        assert!(args.contains(&"--starttime=2024-01-15T00:00:00".to_string()));
        assert!(args.contains(&"--endtime=2024-01-15T12:00:00".to_string()));
        assert!(args.contains(&"--parsable2".to_string()));
        assert!(args.contains(&format!("--format={}", SACCT_FORMAT)));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let mut query = SacctQuery::for_day(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        query.sacct_bin = "nonexistent_sacct_12345".to_string();
        assert!(matches!(
            query.spawn(),
            Err(SacctError::Command(CommandError::Execution { .. }))
        ));
    }
}
