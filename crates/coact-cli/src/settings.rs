//! Layered configuration: defaults, then an optional TOML file, then
//! `COACT_*` environment variables. Command-line flags are applied last.

use crate::{BackendArgs, HoldArgs, ImportArgs};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

const DEFAULT_URL: &str = "http://localhost:8000/graphql";
const DEFAULT_USERNAME: &str = "sdf-bot";
const DEFAULT_SACCT: &str = "sacct";
const DEFAULT_SACCTMGR: &str = "sacctmgr";
const DEFAULT_BATCH: i64 = 1000;
const DEFAULT_WINDOWS: [i64; 4] = [15, 60, 10080, 43800];
const DEFAULT_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// GraphQL endpoint
    pub url: String,
    pub username: String,
    pub password_file: Option<Utf8PathBuf>,
    /// sacct binary
    pub sacct: String,
    /// sacctmgr binary
    pub sacctmgr: String,
    /// Normalization rule table; none means records pass through unchanged
    pub rules: Option<Utf8PathBuf>,
    pub batch: usize,
    /// Usage lookback windows in minutes
    pub windows: Vec<u32>,
    /// Percent used above which a facility is held
    pub threshold: f64,
}

impl Settings {
    /// Load settings from the given file (if any) and the process environment.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        Self::from_sources(path, Environment::with_prefix("COACT"))
    }

    fn from_sources(path: Option<&Utf8Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("url", DEFAULT_URL)?
            .set_default("username", DEFAULT_USERNAME)?
            .set_default("sacct", DEFAULT_SACCT)?
            .set_default("sacctmgr", DEFAULT_SACCTMGR)?
            .set_default("batch", DEFAULT_BATCH)?
            .set_default("windows", DEFAULT_WINDOWS.to_vec())?
            .set_default("threshold", DEFAULT_THRESHOLD)?;

        if let Some(path) = path {
            builder = builder.add_source(File::new(path.as_str(), FileFormat::Toml));
        }

        builder
            .add_source(
                env.try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("windows"),
            )
            .build()?
            .try_deserialize()
    }

    fn apply_backend(&mut self, args: &BackendArgs) {
        if let Some(url) = &args.url {
            self.url = url.clone();
        }
        if let Some(username) = &args.username {
            self.username = username.clone();
        }
        if let Some(path) = &args.password_file {
            self.password_file = Some(path.clone());
        }
    }

    /// Override settings with `slurm-import` flags.
    pub fn apply_import(&mut self, args: &ImportArgs) {
        self.apply_backend(&args.backend);
        if let Some(rules) = &args.rules {
            self.rules = Some(rules.clone());
        }
        if let Some(batch) = args.batch {
            self.batch = batch;
        }
    }

    /// Override settings with `facility-hold` flags.
    pub fn apply_hold(&mut self, args: &HoldArgs) {
        self.apply_backend(&args.backend);
        if let Some(windows) = &args.windows {
            self.windows = windows.clone();
        }
        if let Some(threshold) = args.threshold {
            self.threshold = threshold;
        }
    }
}
