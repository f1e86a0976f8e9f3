//! HHML Merge - stage and merge parsed racing-data files

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hhml_common::logging::{init_logging, LogConfig, LogLevel};
use hhml_common::types::parse_date;
use hhml_merge::config::Config;
use hhml_merge::db::{create_pool, run_migrations};
use hhml_merge::pipeline::{BatchReport, IngestOutcome, IngestPipeline, IngestRequest};
use hhml_merge::store::memory::MemoryStore;
use hhml_merge::store::postgres::PgStore;
use hhml_merge::store::IngestStore;
use hhml_merge::FileType;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hhml-merge")]
#[command(author, version, about = "Racing data staging and merge tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Use an in-memory store; nothing is persisted
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Provider recorded in the ledger
    #[arg(long, env = "INGEST_PROVIDER", global = true)]
    provider: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register, stage and merge provider files
    Ingest {
        /// Provider files; parser rows are read from `<file>.rows.jsonl`
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Parser rows for a single file, overriding the default location
        #[arg(long)]
        rows: Option<PathBuf>,

        /// File type (pp or chart) when the name does not say
        #[arg(long)]
        file_type: Option<String>,

        /// Track code override
        #[arg(long)]
        track: Option<String>,

        /// File date override (YYYY-MM-DD or YYYYMMDD)
        #[arg(long)]
        date: Option<String>,

        /// Files staged at once
        #[arg(long, env = "INGEST_STAGE_CONCURRENCY")]
        stage_concurrency: Option<usize>,

        /// Merges in flight at once
        #[arg(long, env = "INGEST_MERGE_CONCURRENCY")]
        merge_concurrency: Option<usize>,
    },

    /// Merge registered files whose merge never committed
    Resume,

    /// Show the ingestion ledger
    Status {
        /// Only files not yet processed
        #[arg(long)]
        unprocessed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("hhml-merge")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(provider) = cli.provider {
        config.ingest.provider = provider;
    }
    if let Command::Ingest {
        stage_concurrency,
        merge_concurrency,
        ..
    } = &cli.command
    {
        if let Some(n) = stage_concurrency {
            config.ingest.stage_concurrency = *n;
        }
        if let Some(n) = merge_concurrency {
            config.ingest.merge_concurrency = *n;
        }
    }
    config.ingest.validate()?;

    let store: Arc<dyn IngestStore> = if cli.dry_run {
        warn!("Dry run: using an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let pool = create_pool(&config.database)
            .await
            .context("Failed to connect to database")?;
        run_migrations(&pool).await.context("Failed to run migrations")?;
        Arc::new(PgStore::new(pool))
    };

    let pipeline = IngestPipeline::new(store, config.ingest.clone());

    match cli.command {
        Command::Ingest {
            files,
            rows,
            file_type,
            track,
            date,
            ..
        } => {
            if rows.is_some() && files.len() > 1 {
                anyhow::bail!("--rows can only be used with a single file");
            }

            let file_type: Option<FileType> = file_type.as_deref().map(str::parse::<FileType>).transpose()?;
            let date = date
                .as_deref()
                .map(|d| parse_date("date", Some(d)))
                .transpose()?;

            let mut requests = Vec::with_capacity(files.len());
            for path in files {
                let mut request = IngestRequest::from_path(&path, &config.ingest)
                    .with_context(|| format!("Invalid file name: {}", path.display()))?;
                if let Some(rows) = &rows {
                    request = request.with_rows_path(rows);
                }
                let mut meta = request.meta.clone();
                if let Some(file_type) = file_type {
                    meta = meta.with_file_type(file_type);
                }
                if let Some(track) = &track {
                    meta = meta.with_track(track.to_uppercase());
                }
                if let Some(date) = date {
                    meta = meta.with_date(date);
                }
                requests.push(request.with_meta(meta));
            }

            let report = pipeline.run_batch(requests).await;
            summarize(&report)?;
        },
        Command::Resume => {
            let report = pipeline.resume().await?;
            summarize(&report)?;
        },
        Command::Status { unprocessed } => {
            let files = if unprocessed {
                pipeline.ledger().unprocessed().await?
            } else {
                pipeline.ledger().files().await?
            };

            info!(files = files.len(), "Ingestion ledger");
            for file in files {
                info!(
                    file_id = file.file_id,
                    file_name = %file.file_name,
                    file_type = %file.file_type,
                    track_code = file.track_code.as_deref().unwrap_or("-"),
                    file_date = ?file.file_date,
                    staged = file.is_staged(),
                    processed = file.is_processed(),
                    "File"
                );
            }
        },
    }

    Ok(())
}

fn summarize(report: &BatchReport) -> Result<()> {
    for file in &report.files {
        match &file.result {
            Ok(IngestOutcome::Duplicate { file_id }) => {
                info!(file_name = %file.file_name, file_id, "Duplicate content; skipped");
            },
            Ok(IngestOutcome::Merged { file_id, stage, merge }) => {
                info!(
                    file_name = %file.file_name,
                    file_id,
                    staged = stage.as_ref().map_or(0, |s| s.staged),
                    rejected = stage.as_ref().map_or(0, |s| s.rejected.len()),
                    inserted = merge.inserted,
                    updated = merge.updated,
                    unchanged = merge.unchanged,
                    already_processed = merge.already_processed,
                    "Merged"
                );
            },
            Err(e) => {
                error!(file_name = %file.file_name, error = %e, "Failed");
            },
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} file(s) failed", report.files.len());
    }

    info!(merged = report.merged(), duplicates = report.duplicates(), "Done");
    Ok(())
}
