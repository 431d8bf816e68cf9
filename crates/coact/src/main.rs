//! coact - Slurm usage accounting and facility admission control.

mod hold;
mod import;

use clap::Parser;
use coact_backend::{GraphQlBackend, read_password_file};
use coact_cli::{Args, Command, Settings};
use miette::{IntoDiagnostic, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut settings = Settings::load(args.config.as_deref()).into_diagnostic()?;

    // Stages run strictly in sequence
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    match args.command {
        Command::SlurmImport(import) => {
            settings.apply_import(&import);
            runtime.block_on(import::run(&import, &settings))
        }
        Command::FacilityHold(hold) => {
            settings.apply_hold(&hold);
            runtime.block_on(hold::run(&hold, &settings))
        }
    }
}

/// Log to stderr; stdout carries JSON output.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Backend client from settings, reading the password file if one is set.
fn connect(settings: &Settings) -> Result<GraphQlBackend> {
    let password = settings
        .password_file
        .as_deref()
        .map(read_password_file)
        .transpose()
        .into_diagnostic()?;
    if password.is_none() {
        tracing::warn!("No password file configured; connecting without authentication");
    }
    GraphQlBackend::new(&settings.url, &settings.username, password).into_diagnostic()
}
