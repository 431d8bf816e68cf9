//! Account association limits via sacctmgr.

use async_trait::async_trait;
use coact_parsers::{CommandError, non_empty_string, run_command, split_delimited};
use std::fmt;
use tokio::process::Command;

/// sacctmgr association format (--parsable2 uses | delimiter)
const ASSOC_FORMAT: &str = "Account,User,Partition,MaxNodes,MaxJobs";

/// One association row from `sacctmgr show associations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub account: String,
    /// Empty for account-level associations
    pub user: Option<String>,
    pub partition: Option<String>,
    /// None means unlimited
    pub max_nodes: Option<i64>,
    /// None means unlimited
    pub max_jobs: Option<i64>,
}

impl Association {
    /// An account-level association whose node cap is zero blocks new jobs.
    pub fn is_held(&self) -> bool {
        self.max_nodes == Some(0)
    }

    pub fn is_account_level(&self) -> bool {
        self.user.is_none()
    }
}

/// Node cap written to an account association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCap {
    /// MaxNodes=0: no new jobs can start
    Blocked,
    /// MaxNodes=-1: limit cleared
    Unlimited,
}

impl NodeCap {
    pub fn value(self) -> i64 {
        match self {
            NodeCap::Blocked => 0,
            NodeCap::Unlimited => -1,
        }
    }
}

impl fmt::Display for NodeCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MaxNodes={}", self.value())
    }
}

/// Scheduler administration used by the admission controller.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Current association limits.
    async fn associations(&self) -> Result<Vec<Association>, CommandError>;

    /// Set the node cap of an account on a partition.
    async fn set_node_cap(
        &self,
        account: &str,
        partition: &str,
        cap: NodeCap,
    ) -> Result<(), CommandError>;

    /// Human-readable form of the command `set_node_cap` would run.
    fn describe_node_cap(&self, account: &str, partition: &str, cap: NodeCap) -> String;
}

/// Parse a limit column; empty means unlimited.
fn parse_limit(s: &str) -> Option<i64> {
    non_empty_string(s)
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v >= 0)
}

/// Parse a single line of sacctmgr association output.
fn parse_association_line(line: &str) -> Result<Association, String> {
    let fields = split_delimited(line, 5)?;
    Ok(Association {
        account: fields[0].trim().to_string(),
        user: non_empty_string(fields[1]),
        partition: non_empty_string(fields[2]),
        max_nodes: parse_limit(fields[3]),
        max_jobs: parse_limit(fields[4]),
    })
}

/// Parse the full output of `sacctmgr show associations`.
pub fn parse_associations(stdout: &str) -> Vec<Association> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_association_line(line) {
            Ok(assoc) => Some(assoc),
            Err(e) => {
                tracing::warn!("Failed to parse sacctmgr line: {}", e);
                None
            }
        })
        .collect()
}

/// The real sacctmgr binary.
#[derive(Debug, Clone)]
pub struct Sacctmgr {
    bin: String,
}

impl Sacctmgr {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn node_cap_args(account: &str, partition: &str, cap: NodeCap) -> Vec<String> {
        vec![
            "--immediate".to_string(),
            "modify".to_string(),
            "account".to_string(),
            "where".to_string(),
            format!("name={}", account),
            format!("partition={}", partition),
            "set".to_string(),
            cap.to_string(),
        ]
    }
}

impl Default for Sacctmgr {
    fn default() -> Self {
        Self::new("sacctmgr")
    }
}

#[async_trait]
impl Scheduler for Sacctmgr {
    async fn associations(&self) -> Result<Vec<Association>, CommandError> {
        let format = format!("format={}", ASSOC_FORMAT);
        let mut cmd = Command::new(&self.bin);
        cmd.args([
            "show",
            "associations",
            format.as_str(),
            "--parsable2",
            "--noheader",
        ]);
        let stdout = run_command(&mut cmd, "sacctmgr").await?;
        Ok(parse_associations(&stdout))
    }

    async fn set_node_cap(
        &self,
        account: &str,
        partition: &str,
        cap: NodeCap,
    ) -> Result<(), CommandError> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(Self::node_cap_args(account, partition, cap));
        run_command(&mut cmd, "sacctmgr").await?;
        Ok(())
    }

    fn describe_node_cap(&self, account: &str, partition: &str, cap: NodeCap) -> String {
        format!(
            "{} {}",
            self.bin,
            Self::node_cap_args(account, partition, cap).join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_association_line() {
        let assoc = parse_association_line("lcls||roma|0|").unwrap();
        assert_eq!(assoc.account, "lcls");
        assert_eq!(assoc.user, None);
        assert_eq!(assoc.partition.as_deref(), Some("roma"));
        assert_eq!(assoc.max_nodes, Some(0));
        assert_eq!(assoc.max_jobs, None);
        assert!(assoc.is_held());
        assert!(assoc.is_account_level());
    }

    #[test]
    fn test_unlimited_is_not_held() {
        let assoc = parse_association_line("lcls||roma||100").unwrap();
        assert_eq!(assoc.max_nodes, None);
        assert_eq!(assoc.max_jobs, Some(100));
        assert!(!assoc.is_held());

        let assoc = parse_association_line("lcls||roma|-1|").unwrap();
        assert_eq!(assoc.max_nodes, None);
    }

    #[test]
    fn test_parse_associations_skips_bad_lines() {
        let out = "lcls||roma|0|\n\nbroken\nrubin|alice|milano|4|10\n";
        let assocs = parse_associations(out);
        assert_eq!(assocs.len(), 2);
        assert_eq!(assocs[1].user.as_deref(), Some("alice"));
        assert!(!assocs[1].is_account_level());
    }

    #[test]
    fn test_describe_node_cap() {
        let sacctmgr = Sacctmgr::default();
        assert_eq!(
            sacctmgr.describe_node_cap("lcls", "roma", NodeCap::Blocked),
            "sacctmgr --immediate modify account where name=lcls partition=roma set MaxNodes=0"
        );
        assert_eq!(
            sacctmgr.describe_node_cap("lcls", "roma", NodeCap::Unlimited),
            "sacctmgr --immediate modify account where name=lcls partition=roma set MaxNodes=-1"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_command_error() {
        let sacctmgr = Sacctmgr::new("nonexistent_sacctmgr_12345");
        assert!(matches!(
            sacctmgr.associations().await,
            Err(CommandError::Execution { .. })
        ));
    }
}
