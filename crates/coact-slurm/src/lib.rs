//! SLURM integration for coact.
//!
//! Read job accounting via sacct and manage account limits via sacctmgr.

pub mod reader;
pub mod sacct;
pub mod sacctmgr;
pub mod source;
pub mod types;

pub use reader::{HeaderIndex, RecordReader};
pub use sacct::{SACCT_FORMAT, SacctError, SacctQuery};
pub use sacctmgr::{Association, NodeCap, Sacctmgr, Scheduler};
pub use source::{LineSource, ReaderLines, StaticLines};
pub use types::{DEFAULT_FACILITY, DEFAULT_REPO, JobAccountingRecord, JobState};
