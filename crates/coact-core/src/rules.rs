//! Declarative remapping of legacy account, partition and QOS values.
//!
//! The rule table is a JSON array read at start-up:
//!
//! ```json
//! [
//!   { "match": { "user": "svc-.*", "account": "" }, "set": { "account": "shared:default" } },
//!   { "match": { "partition": "lcls-old" }, "set": { "partition": "roma" } },
//!   { "match": { "qos": "test" }, "drop": true }
//! ]
//! ```
//!
//! Patterns are regular expressions matched against the whole field. Rules
//! apply in order, each seeing the output of the ones before it; a matching
//! `drop` rule discards the record.

use camino::Utf8Path;
use coact_slurm::JobAccountingRecord;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("Failed to read rule table {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid rule table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Rule {index}: bad {field} pattern: {source}")]
    Pattern {
        index: usize,
        field: &'static str,
        source: regex::Error,
    },
    #[error("Rule {0} matches every record")]
    EmptyMatch(usize),
    #[error("Rule {0} neither sets a field nor drops")]
    NoAction(usize),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMatch {
    user: Option<String>,
    account: Option<String>,
    partition: Option<String>,
    qos: Option<String>,
}

/// Replacement values applied by a matching rule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSet {
    pub account: Option<String>,
    pub partition: Option<String>,
    pub qos: Option<String>,
}

impl FieldSet {
    fn is_empty(&self) -> bool {
        self.account.is_none() && self.partition.is_none() && self.qos.is_none()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(rename = "match", default)]
    matches: RawMatch,
    #[serde(default)]
    set: FieldSet,
    #[serde(default)]
    drop: bool,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug)]
struct Rule {
    user: Option<Regex>,
    account: Option<Regex>,
    partition: Option<Regex>,
    qos: Option<Regex>,
    set: FieldSet,
    drop: bool,
    comment: Option<String>,
}

fn anchored(
    index: usize,
    field: &'static str,
    pattern: Option<String>,
) -> Result<Option<Regex>, RulesError> {
    pattern
        .map(|p| {
            Regex::new(&format!("^(?:{p})$")).map_err(|source| RulesError::Pattern {
                index,
                field,
                source,
            })
        })
        .transpose()
}

impl Rule {
    fn compile(index: usize, raw: RawRule) -> Result<Self, RulesError> {
        let rule = Rule {
            user: anchored(index, "user", raw.matches.user)?,
            account: anchored(index, "account", raw.matches.account)?,
            partition: anchored(index, "partition", raw.matches.partition)?,
            qos: anchored(index, "qos", raw.matches.qos)?,
            set: raw.set,
            drop: raw.drop,
            comment: raw.comment,
        };
        if rule.user.is_none()
            && rule.account.is_none()
            && rule.partition.is_none()
            && rule.qos.is_none()
        {
            return Err(RulesError::EmptyMatch(index));
        }
        if !rule.drop && rule.set.is_empty() {
            return Err(RulesError::NoAction(index));
        }
        Ok(rule)
    }

    fn matches(&self, record: &JobAccountingRecord) -> bool {
        let hit = |re: &Option<Regex>, value: &str| re.as_ref().is_none_or(|re| re.is_match(value));
        hit(&self.user, &record.username)
            && hit(&self.account, &record.account)
            && hit(&self.partition, &record.partition)
            && hit(&self.qos, &record.qos)
    }
}

/// Ordered rule table. The empty table passes every record through.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn from_json(text: &str) -> Result<Self, RulesError> {
        let raw_rules: Vec<RawRule> = serde_json::from_str(text)?;
        let rules = raw_rules
            .into_iter()
            .enumerate()
            .map(|(index, raw)| Rule::compile(index, raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn load(path: &Utf8Path) -> Result<Self, RulesError> {
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.to_string(),
            source,
        })?;
        let table = Self::from_json(&text)?;
        tracing::info!("Loaded {} normalization rules from {}", table.len(), path);
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Normalize a record, or return None if a rule drops it.
    pub fn apply(&self, mut record: JobAccountingRecord) -> Option<JobAccountingRecord> {
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.matches(&record) {
                continue;
            }
            if rule.drop {
                tracing::debug!(
                    "Job {} dropped by rule {} {}",
                    record.job_id,
                    index,
                    rule.comment.as_deref().unwrap_or("")
                );
                return None;
            }
            if let Some(account) = &rule.set.account {
                record.account = account.clone();
            }
            if let Some(partition) = &rule.set.partition {
                record.partition = partition.clone();
            }
            if let Some(qos) = &rule.set.qos {
                record.qos = qos.clone();
            }
        }
        Some(record)
    }
}
