//! Command line entry point.
//!
//! ```bash
//! dicom-study-prep organize /data/raw /data/metadata
//! dicom-study-prep process --output-path /data/processed
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dicom_study_prep::{
    config::{Config, PathOverrides},
    consolidate::{consolidate, group_by_study},
    enums::SortBy,
    ingest::Ingestor,
    lookup::CanonicalLookupTable,
    processing_log,
    report::{RunAnalysis, label_distribution},
    store::MetadataStore,
    study_processor::StudyProcessor,
    volume_loader::VolumeLoader,
};
use std::{fs, path::PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dicom-study-prep")]
#[command(about = "Organize raw DICOM series and resample complete studies", long_about = None)]
struct Cli {
    /// Pipeline configuration (YAML)
    #[arg(long, global = true, default_value = Config::DEFAULT_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract metadata and canonical labels from every raw series
    Organize {
        /// Root of the raw DICOM folders
        raw: Option<PathBuf>,
        /// Directory for the metadata table, log and summary
        metadata: Option<PathBuf>,
    },

    /// Resample complete studies onto their reference series
    Process {
        #[arg(long)]
        metadata_path: Option<PathBuf>,
        #[arg(long)]
        output_path: Option<PathBuf>,
        #[arg(long)]
        raw_path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let overrides = match cli.command {
        Commands::Organize { ref raw, ref metadata } => PathOverrides {
            dicom_raw: raw.clone(),
            metadata: metadata.clone(),
            dicom_processed: None,
        },
        Commands::Process {
            ref metadata_path,
            ref output_path,
            ref raw_path,
        } => PathOverrides {
            dicom_raw: raw_path.clone(),
            metadata: metadata_path.clone(),
            dicom_processed: output_path.clone(),
        },
    };
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration {}", cli.config.display()))?
        .with_overrides(overrides);

    match cli.command {
        Commands::Organize { .. } => organize(&config),
        Commands::Process { .. } => process(&config),
    }
}

fn organize(config: &Config) -> Result<()> {
    let paths = &config.paths;
    info!(raw = %paths.dicom_raw.display(), "processing DICOM tree");
    fs::create_dir_all(&paths.metadata)
        .with_context(|| format!("creating {}", paths.metadata.display()))?;

    let table = CanonicalLookupTable::from_path(&paths.series_descriptions)?;
    info!(entries = table.len(), "loaded series description lookup");

    let loader = VolumeLoader::new(SortBy::ImagePositionPatient);
    let report = Ingestor::new(&loader, &config.dicom_tags, &table)
        .run(&paths.dicom_raw, &paths.metadata)?;

    MetadataStore::in_dir(&paths.metadata).write(&report.records)?;

    let analysis = RunAnalysis::new(&report.records, report.stats);
    analysis.log(&report.log_path);
    processing_log::append_summary(&report.log_path, &report.stats)
        .context("appending summary to processing log")?;
    analysis
        .write_report(&paths.metadata)
        .context("writing summary report")?;
    Ok(())
}

fn process(config: &Config) -> Result<()> {
    let store = MetadataStore::in_dir(&config.paths.metadata);
    let records = store.read()?;
    info!(
        series = records.len(),
        studies = group_by_study(&records).len(),
        "loaded series metadata"
    );

    let studies = consolidate(&records, &config.series_to_process);
    if studies.is_empty() {
        warn!(
            required = ?config.series_to_process.labels().collect::<Vec<_>>(),
            available = ?label_distribution(&records),
            "no study contains every required series"
        );
        return Ok(());
    }
    info!(
        series = studies.iter().map(|study| study.selections.len()).sum::<usize>(),
        studies = studies.len(),
        "selected studies with all required series"
    );

    let loader = VolumeLoader::new(SortBy::ImagePositionPatient);
    let summary = StudyProcessor::new(&loader, config).run(&studies);
    info!(
        written = summary.written.len(),
        failed = summary.failed.len(),
        output = %config.paths.dicom_processed.display(),
        "resampling finished"
    );
    Ok(())
}
