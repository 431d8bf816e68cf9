//! `coact slurm-import`

use crate::connect;
use coact_backend::{Backend, GraphQlBackend};
use coact_cli::{ImportArgs, OutputMode, Settings};
use coact_core::{Metadata, RuleTable};
use coact_pipeline::{BatchEmitter, IngestOptions, JsonSink, UploadSink, run_ingest};
use coact_slurm::{LineSource, ReaderLines, RecordReader, SacctQuery};
use miette::{IntoDiagnostic, Result};

pub async fn run(args: &ImportArgs, settings: &Settings) -> Result<()> {
    let rules = match &settings.rules {
        Some(path) => RuleTable::load(path).into_diagnostic()?,
        None => RuleTable::default(),
    };

    let backend = connect(settings)?;
    tracing::info!("Gathering metadata from {}", backend.url());
    let metadata = backend.fetch_metadata().await.into_diagnostic()?;

    let job = Ingest {
        args,
        settings,
        backend: &backend,
        metadata: &metadata,
        rules: &rules,
    };

    match args.input.as_deref() {
        Some(path) if path.as_str() == "-" => {
            tracing::info!("Reading sacct output from stdin");
            job.run(ReaderLines::stdin()).await
        }
        Some(path) => {
            tracing::info!("Reading sacct output from {}", path);
            let lines = ReaderLines::open(path).await.into_diagnostic()?;
            job.run(lines).await
        }
        None => {
            let query = SacctQuery {
                sacct_bin: settings.sacct.clone(),
                date: args
                    .date
                    .unwrap_or_else(|| chrono::Local::now().date_naive()),
                start_time: args.starttime.clone(),
                end_time: args.endtime.clone(),
            };
            job.run(query.spawn().into_diagnostic()?).await
        }
    }
}

/// Everything an import needs besides its line source.
struct Ingest<'a> {
    args: &'a ImportArgs,
    settings: &'a Settings,
    backend: &'a GraphQlBackend,
    metadata: &'a Metadata,
    rules: &'a RuleTable,
}

impl Ingest<'_> {
    async fn run<S: LineSource>(&self, source: S) -> Result<()> {
        let mut reader = RecordReader::open(source).await.into_diagnostic()?;
        let options = IngestOptions {
            exit_on_error: self.args.exit_on_error,
        };

        match self.args.output {
            OutputMode::Json => {
                let mut emitter =
                    BatchEmitter::new(JsonSink::new(std::io::stdout()), self.settings.batch);
                let summary =
                    run_ingest(&mut reader, self.metadata, self.rules, &mut emitter, &options)
                        .await
                        .into_diagnostic()?;
                summary.log();
            }
            OutputMode::Upload => {
                let sink = UploadSink::new(self.backend, self.args.dry_run);
                let mut emitter = BatchEmitter::new(sink, self.settings.batch);
                let summary =
                    run_ingest(&mut reader, self.metadata, self.rules, &mut emitter, &options)
                        .await
                        .into_diagnostic()?;
                summary.log();

                let totals = emitter.sink().summary();
                tracing::info!(
                    "Import totals: {} inserted, {} upserted, {} modified, {} deleted",
                    totals.inserted_count,
                    totals.upserted_count,
                    totals.modified_count,
                    totals.deleted_count
                );
            }
        }
        Ok(())
    }
}
