//! Configuration values handed explicitly to each pipeline component.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::{Metric, MetricKind};
use crate::normalize::RenameChain;

#[derive(thiserror::Error, Debug, PartialEq)]
/// Errors raised when a configuration value is unusable.
pub enum ConfigError {
    /// Target year outside the supported range.
    #[error("Invalid target year: {0}")]
    InvalidYear(i32),
    /// Threshold value negative or not finite.
    #[error("Invalid threshold for {metric}: {reason}")]
    InvalidThreshold {
        /// Metric the threshold belongs to.
        metric: Metric,
        /// What is wrong with it.
        reason: String,
    },
    /// A rename rule with an empty pattern would match nothing or everything.
    #[error("Rename rule {index} has an empty pattern")]
    EmptyRenamePattern {
        /// Zero-based index of the rule in the chain.
        index: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Tolerance for one metric's year-over-year change.
pub struct MetricThreshold {
    /// Absolute changes at or below this value are never flagged.
    pub absolute_floor: f64,
    /// Percentage changes above this value (in percent) are flagged.
    pub percent_ceiling: f64,
}

impl MetricThreshold {
    /// Default tolerance for tonnage metrics.
    pub const TONNAGE_DEFAULT: Self = Self {
        absolute_floor: 5.0,
        percent_ceiling: 25.0,
    };

    /// Default tolerance for rate metrics.
    pub const RATE_DEFAULT: Self = Self {
        absolute_floor: 0.02,
        percent_ceiling: 10.0,
    };

    /// Default tolerance for the metric's unit family.
    #[must_use]
    pub fn default_for(metric: Metric) -> Self {
        match metric.kind() {
            MetricKind::Tonnage => Self::TONNAGE_DEFAULT,
            MetricKind::Rate => Self::RATE_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
/// Per-metric thresholds; metrics without an entry use their kind's default.
pub struct Thresholds {
    overrides: BTreeMap<Metric, MetricThreshold>,
}

impl Thresholds {
    /// Replace the threshold for one metric.
    #[must_use]
    pub fn with(mut self, metric: Metric, threshold: MetricThreshold) -> Self {
        self.overrides.insert(metric, threshold);
        self
    }

    /// Threshold in effect for `metric`.
    #[must_use]
    pub fn for_metric(&self, metric: Metric) -> MetricThreshold {
        self.overrides
            .get(&metric)
            .copied()
            .unwrap_or_else(|| MetricThreshold::default_for(metric))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Everything the normalizer, aggregator, and validator need for one run.
pub struct PipelineConfig {
    /// Calendar year being computed.
    pub year: i32,
    /// Ordered material rename rules.
    #[serde(default)]
    pub rename: RenameChain,
    /// Year-over-year tolerances.
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl PipelineConfig {
    /// Configuration for `year` with the built-in rename chain and default thresholds.
    #[must_use]
    pub fn new(year: i32) -> Self {
        Self {
            year,
            rename: RenameChain::default(),
            thresholds: Thresholds::default(),
        }
    }

    /// Replace the thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first unusable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1900..=9999).contains(&self.year) {
            return Err(ConfigError::InvalidYear(self.year));
        }

        for metric in Metric::ALL {
            let threshold = self.thresholds.for_metric(metric);
            for (label, value) in [
                ("absolute floor", threshold.absolute_floor),
                ("percent ceiling", threshold.percent_ceiling),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::InvalidThreshold {
                        metric,
                        reason: format!("{label} must be a non-negative number, got {value}"),
                    });
                }
            }
        }

        if let Some(index) = self.rename.first_empty_pattern() {
            return Err(ConfigError::EmptyRenamePattern { index });
        }

        Ok(())
    }
}
