//! Command line tool that computes diversion facility metrics, publishes them,
//! and validates them against the prior year.

mod app;
mod input;
mod json_sink;
mod report;
mod review;
mod settings;
mod ui;

use std::{
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diversion_core::{
    DiversionService, LayerSink, RawFacilityRow, RecordSource, SinkRegistry, ValidationOutcome,
};
use diversion_sink_feature_service as feature_service;
use diversion_source_csv::CsvRecordSource;
use reqwest::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::json_sink::JsonDirSink;
use crate::settings::Settings;

/// Diversion facility metrics
#[derive(Parser, Debug)]
#[command(name = "diversion", version)]
#[command(about = "Compute, publish, and validate recycling and composting facility metrics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute metrics for the configured year and replace every published layer
    Publish {
        /// TOML configuration file
        #[arg(long, env = "DIVERSION_CONFIG", value_name = "FILE")]
        config: PathBuf,
        /// Facility report export (CSV)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Write layers as JSON files here instead of the feature service
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
    /// Compare the configured year with the prior year's report
    Validate {
        /// TOML configuration file
        #[arg(long, env = "DIVERSION_CONFIG", value_name = "FILE")]
        config: PathBuf,
        /// Facility report export (CSV)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Prior year's report, as written by --write-report
        #[arg(long, value_name = "FILE")]
        baseline: PathBuf,
        /// Write the findings list as JSON
        #[arg(long, value_name = "FILE")]
        findings_out: Option<PathBuf>,
        /// Write this year's report as JSON, for use as next year's baseline
        #[arg(long, value_name = "FILE")]
        write_report: Option<PathBuf>,
    },
    /// Browse a findings list in the terminal
    Review {
        /// Findings list written by `validate --findings-out`
        #[arg(long, value_name = "FILE")]
        findings: PathBuf,
    },
}

/// Exit status when the comparison could not run.
const BASELINE_UNAVAILABLE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Publish {
            config,
            input,
            out_dir,
        } => {
            let settings = Settings::load(&config).await?;
            init_tracing(&settings.logging.level);
            publish(&settings, input, out_dir).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate {
            config,
            input,
            baseline,
            findings_out,
            write_report,
        } => {
            let settings = Settings::load(&config).await?;
            init_tracing(&settings.logging.level);
            validate(&settings, input, &baseline, findings_out, write_report).await
        }
        Command::Review { findings } => {
            review::run(&findings).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn read_rows(settings: &Settings, input: PathBuf) -> Result<Vec<RawFacilityRow>> {
    let source = CsvRecordSource::new(input);
    source
        .fetch_rows(settings.pipeline.year)
        .await
        .with_context(|| format!("Failed to read {}", source.describe()))
}

fn sinks(settings: &Settings, out_dir: Option<PathBuf>) -> Result<SinkRegistry> {
    if let Some(dir) = out_dir {
        let sink: Arc<dyn LayerSink> = Arc::new(JsonDirSink::new(dir));
        return Ok(SinkRegistry::uniform(&sink));
    }

    let config = settings
        .publish
        .feature_service
        .as_ref()
        .context("No --out-dir given and no [publish.feature_service] configured")?;
    let client = Client::builder()
        .user_agent(concat!("diversion/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(feature_service::registry(&client, config))
}

async fn publish(settings: &Settings, input: PathBuf, out_dir: Option<PathBuf>) -> Result<()> {
    let registry = Arc::new(sinks(settings, out_dir)?);
    let service = DiversionService::new(settings.pipeline.clone(), registry)?;
    let rows = read_rows(settings, input).await?;

    let run = service.publish_run(&rows);
    if !run.batch.rejected().is_empty() {
        warn!(
            rejected = run.batch.rejected().len(),
            "some rows were rejected and are not published"
        );
    }

    let summary = service
        .publish(&run.report)
        .await
        .context("Failed to publish layers")?;
    for (layer, written) in &summary.layers {
        info!(%layer, written, "published");
    }
    info!(year = summary.year, empty = summary.empty, "publish finished");
    Ok(())
}

#[expect(clippy::print_stdout, reason = "the report is the command's output")]
fn print_report(text: &str) {
    print!("{text}");
}

async fn validate(
    settings: &Settings,
    input: PathBuf,
    baseline: &Path,
    findings_out: Option<PathBuf>,
    write_report: Option<PathBuf>,
) -> Result<ExitCode> {
    let service = DiversionService::new(settings.pipeline.clone(), Arc::new(SinkRegistry::empty()))?;
    let rows = read_rows(settings, input).await?;

    let prior = report::load_baseline(baseline).await;
    let mut run = service.validation_run(&rows, prior.as_ref().ok());
    if let Err(reason) = prior {
        run.outcome = ValidationOutcome::BaselineUnavailable { reason };
    }

    print_report(&report::render(&run.batch, &run.outcome));

    if let Some(path) = write_report {
        let published = service.publish_run(&rows).report;
        report::write_json(&path, &published).await?;
        info!(path = %path.display(), "wrote report for use as a baseline");
    }

    let Some(findings) = run.outcome.findings() else {
        if findings_out.is_some() {
            warn!("no findings list written because the comparison did not run");
        }
        return Ok(ExitCode::from(BASELINE_UNAVAILABLE));
    };
    if let Some(path) = findings_out {
        report::write_json(&path, &findings).await?;
        info!(path = %path.display(), findings = findings.len(), "wrote findings");
    }
    Ok(ExitCode::SUCCESS)
}
