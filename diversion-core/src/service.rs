//! High-level service facade running the publish and validation paths.

use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::config::{ConfigError, PipelineConfig};
use crate::metrics::AggregateReport;
use crate::model::RawFacilityRow;
use crate::normalize::{NormalizedBatch, Normalizer};
use crate::ports::{LayerId, LayerTable, PortError, WriteMode};
use crate::registry::SinkRegistry;
use crate::validate::{ValidationOutcome, Validator};

/// Output of the publish path: every facility, closed ones flagged.
#[derive(Debug, Clone)]
pub struct PublishRun {
    /// Normalized rows and rejections.
    pub batch: NormalizedBatch,
    /// Metrics ready to publish.
    pub report: AggregateReport,
}

/// Output of the validation path: open facilities only.
#[derive(Debug, Clone)]
pub struct ValidationRun {
    /// Normalized rows and rejections.
    pub batch: NormalizedBatch,
    /// Current-year metrics the comparison used.
    pub report: AggregateReport,
    /// Findings, or why the comparison did not run.
    pub outcome: ValidationOutcome,
}

/// Rows each sink accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    /// Year published.
    pub year: i32,
    /// Rows written per layer, in publish order.
    pub layers: Vec<(LayerId, usize)>,
    /// Set when the report was empty and every layer was replaced with nothing.
    pub empty: bool,
}

/// Public entry point for computing, publishing, and validating metrics.
pub struct DiversionService {
    config: PipelineConfig,
    registry: Arc<SinkRegistry>,
}

impl DiversionService {
    /// Create a service bound to `config` and the sinks in `registry`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration is unusable.
    pub fn new(config: PipelineConfig, registry: Arc<SinkRegistry>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, registry })
    }

    /// Normalize raw rows for the configured year.
    #[must_use]
    pub fn normalize(&self, rows: &[RawFacilityRow]) -> NormalizedBatch {
        Normalizer::new(&self.config).normalize(rows)
    }

    /// Compute the metrics to publish, closed facilities included.
    #[must_use]
    pub fn publish_run(&self, rows: &[RawFacilityRow]) -> PublishRun {
        let batch = self.normalize(rows);
        let report = aggregate(batch.for_publish());
        PublishRun { batch, report }
    }

    /// Compute current metrics over open facilities and compare them with the
    /// prior year's published metrics.
    #[must_use]
    pub fn validation_run(
        &self,
        rows: &[RawFacilityRow],
        baseline: Option<&AggregateReport>,
    ) -> ValidationRun {
        let batch = self.normalize(rows);
        let report = aggregate(batch.for_validation());
        let outcome = Validator::new(&self.config.thresholds).validate(&report, baseline);
        ValidationRun {
            batch,
            report,
            outcome,
        }
    }

    /// Replace every registered layer with the tables of `report`.
    ///
    /// An empty report still replaces every layer; the summary flags it.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] from the first sink that fails. Layers written
    /// before the failure stay written.
    pub async fn publish(&self, report: &AggregateReport) -> Result<PublishSummary, PortError> {
        let empty = report.is_empty();
        if empty {
            warn!(year = report.year, "publishing an empty report; every layer will be cleared");
        }

        let mut layers = Vec::new();
        for table in LayerTable::from_report(report) {
            let sink = self.registry.sink(table.layer)?;
            let written = sink.write(&table, WriteMode::Replace).await?;
            info!(
                layer = %table.layer,
                rows = table.len(),
                written,
                sink = %sink.describe(),
                "layer replaced"
            );
            layers.push((table.layer, written));
        }

        Ok(PublishSummary {
            year: report.year,
            layers,
            empty,
        })
    }
}
