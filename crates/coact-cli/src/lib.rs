//! CLI argument parsing for coact.

pub mod settings;

pub use settings::Settings;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "coact")]
#[command(version)]
#[command(about = "Slurm usage accounting and facility admission control")]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Charge a day of sacct job records to their allocations
    SlurmImport(ImportArgs),
    /// Hold or release facilities based on recent cluster usage
    FacilityHold(HoldArgs),
}

/// Where charge records go.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Pretty-printed JSON on stdout
    #[default]
    Json,
    /// importJobs mutation on the backend
    Upload,
}

/// Backend connection flags shared by every subcommand.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct BackendArgs {
    /// GraphQL endpoint
    #[arg(long)]
    pub url: Option<String>,

    /// Basic auth username
    #[arg(long)]
    pub username: Option<String>,

    /// File holding the basic auth password
    #[arg(long)]
    pub password_file: Option<Utf8PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct ImportArgs {
    /// Read sacct output from a file instead of running sacct ("-" for stdin)
    #[arg(long)]
    pub input: Option<Utf8PathBuf>,

    /// Day to import, YYYYMMDD (default: today)
    #[arg(long, value_parser = parse_day)]
    pub date: Option<NaiveDate>,

    /// Start of the import window within the day
    #[arg(long, default_value = "00:00:00")]
    pub starttime: String,

    /// End of the import window within the day
    #[arg(long, default_value = "23:59:59")]
    pub endtime: String,

    /// Jobs per batch
    #[arg(long)]
    pub batch: Option<usize>,

    /// Output mode
    #[arg(long, value_enum, default_value_t = OutputMode::Json)]
    pub output: OutputMode,

    /// Abort on the first job with no matching allocation
    #[arg(long)]
    pub exit_on_error: bool,

    /// Normalization rule table (JSON)
    #[arg(long)]
    pub rules: Option<Utf8PathBuf>,

    /// Log uploads instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(ClapArgs, Debug)]
pub struct HoldArgs {
    /// Lookback windows in minutes, comma separated
    #[arg(long, value_delimiter = ',')]
    pub windows: Option<Vec<u32>>,

    /// Percent used above which a facility is held
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Log sacctmgr commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub backend: BackendArgs,
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|e| format!("expected YYYYMMDD: {}", e))
}
