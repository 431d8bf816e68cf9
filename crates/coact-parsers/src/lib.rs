//! Shared parsing utilities for scheduler accounting output.
//!
//! Used by coact-slurm for sacct/sacctmgr output and by coact-core for
//! resource request strings.

pub mod command;
pub mod quantity;
pub mod time;

pub use command::{CommandError, CommandLines, run_command, spawn_lines};
pub use quantity::{QuantityError, parse_quantity};
pub use time::{format_timestamp_millis, parse_elapsed, parse_timestamp};

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "N/A" || trimmed == "Unknown" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a pipe-delimited line and validate field count.
pub fn split_delimited(line: &str, min_fields: usize) -> Result<Vec<&str>, String> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < min_fields {
        return Err(format!(
            "Expected {} fields, got {}: {}",
            min_fields,
            fields.len(),
            line
        ));
    }
    Ok(fields)
}
