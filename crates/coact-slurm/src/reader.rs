//! Header-driven reader for pipe-delimited sacct output.

use crate::sacct::SacctError;
use crate::source::LineSource;
use crate::types::{JobAccountingRecord, JobState};
use coact_parsers::{non_empty_string, parse_elapsed, parse_quantity, parse_timestamp};
use std::collections::HashMap;

/// Columns a header must name.
const REQUIRED_COLUMNS: [&str; 9] = [
    "JobID",
    "User",
    "Account",
    "Partition",
    "QOS",
    "Start",
    "End",
    "AllocNodes",
    "AllocTRES",
];

/// Column name to position, taken from the header line.
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    columns: HashMap<String, usize>,
    width: usize,
}

impl HeaderIndex {
    pub fn parse(line: &str) -> Result<Self, SacctError> {
        let columns: HashMap<String, usize> = line
            .split('|')
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect();

        if let Some(missing) = REQUIRED_COLUMNS
            .iter()
            .find(|name| !columns.contains_key(**name))
        {
            return Err(SacctError::MissingColumn(*missing));
        }

        Ok(Self {
            width: line.split('|').count(),
            columns,
        })
    }

    /// Number of columns every data line must have.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }
}

/// Fields of one data line, looked up by column name.
struct Row<'a> {
    header: &'a HeaderIndex,
    fields: Vec<&'a str>,
}

impl<'a> Row<'a> {
    fn get(&self, name: &str) -> &'a str {
        self.header
            .position(name)
            .and_then(|idx| self.fields.get(idx).copied())
            .unwrap_or("")
    }

    fn to_record(&self) -> Result<JobAccountingRecord, SacctError> {
        let job_id = self.get("JobID").to_string();

        let alloc_nodes = match self.get("AllocNodes").trim() {
            "" => 0,
            s => parse_quantity(s).map_err(|source| SacctError::Quantity {
                job_id: job_id.clone(),
                field: "AllocNodes",
                source,
            })?,
        };

        Ok(JobAccountingRecord {
            username: self.get("User").to_string(),
            uid: self.get("UID").trim().parse().ok(),
            account: self.get("Account").to_string(),
            partition: self.get("Partition").to_string(),
            qos: self.get("QOS").to_string(),
            submit_time: parse_timestamp(self.get("Submit")),
            start_time: parse_timestamp(self.get("Start")),
            end_time: parse_timestamp(self.get("End")),
            elapsed: parse_elapsed(self.get("Elapsed")),
            ncpus: self.get("NCPUS").trim().parse().unwrap_or(0),
            alloc_nodes,
            alloc_tres: self.get("AllocTRES").to_string(),
            cpu_time_raw: self.get("CPUTimeRAW").trim().parse().ok(),
            nodelist: non_empty_string(self.get("NodeList")),
            reservation: non_empty_string(self.get("Reservation")),
            reservation_id: non_empty_string(self.get("ReservationId")),
            state: non_empty_string(self.get("State")).map(|s| JobState::from(s.as_str())),
            job_id,
        })
    }
}

/// Turns a line source into accounting records.
///
/// The first non-empty line is the header. Data lines shorter than the
/// header are dropped with a warning; a live sacct can emit partial lines.
pub struct RecordReader<S> {
    source: S,
    header: HeaderIndex,
    line_no: usize,
    short_lines: usize,
}

impl<S: LineSource> RecordReader<S> {
    /// Read the header and prepare to read records.
    pub async fn open(mut source: S) -> Result<Self, SacctError> {
        let mut line_no = 0;
        let header = loop {
            line_no += 1;
            match source.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break HeaderIndex::parse(line.trim_end())?,
                None => return Err(SacctError::MissingHeader),
            }
        };
        tracing::debug!("sacct header has {} columns", header.width());

        Ok(Self {
            source,
            header,
            line_no,
            short_lines: 0,
        })
    }

    pub fn header(&self) -> &HeaderIndex {
        &self.header
    }

    /// Number of data lines dropped for having too few columns.
    pub fn short_lines(&self) -> usize {
        self.short_lines
    }

    /// Read the next record, or None at end of input.
    pub async fn next_record(&mut self) -> Result<Option<JobAccountingRecord>, SacctError> {
        while let Some(line) = self.source.next_line().await? {
            self.line_no += 1;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < self.header.width() {
                tracing::warn!(
                    "Dropping line {}: expected {} fields, got {}: {}",
                    self.line_no,
                    self.header.width(),
                    fields.len(),
                    line
                );
                self.short_lines += 1;
                continue;
            }

            let row = Row {
                header: &self.header,
                fields,
            };
            return row.to_record().map(Some);
        }
        Ok(None)
    }
}
