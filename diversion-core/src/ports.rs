//! Traits describing the record source and layer sink boundaries, plus the
//! table types that cross them.

use std::fmt;

use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;

use crate::metrics::{
    AggregateReport, CountySummary, FacilityMetrics, MaterialShare, MaterialStream, StateSummary,
};
use crate::model::RawFacilityRow;

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to sources and sinks.
pub enum PortError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// A JSON payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] JsonError),
    /// Local file access failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The source table is not in the expected shape.
    #[error("Malformed source table: {0}")]
    MalformedSource(String),
    /// The sink refused the write.
    #[error("Rejected by sink: {0}")]
    Rejected(String),
    /// No sink is registered for the layer.
    #[error("No sink registered for layer {0}")]
    UnregisteredLayer(LayerId),
    /// Internal adapter error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Published layers.
pub enum LayerId {
    /// Facility metrics, closed facilities flagged.
    Facilities,
    /// County summaries with the statewide total row.
    Counties,
    /// The single statewide summary.
    Statewide,
    /// Statewide recycling tons by material.
    MaterialsRecycled,
    /// Statewide composting tons by material.
    MaterialsComposted,
}

impl LayerId {
    /// Every layer in publish order.
    pub const ALL: [Self; 5] = [
        Self::Facilities,
        Self::Counties,
        Self::Statewide,
        Self::MaterialsRecycled,
        Self::MaterialsComposted,
    ];

    /// Stable slug used in file names and configuration keys.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Facilities => "facilities",
            Self::Counties => "counties",
            Self::Statewide => "statewide",
            Self::MaterialsRecycled => "materials_recycled",
            Self::MaterialsComposted => "materials_composted",
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.slug())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a sink treats the rows already in a layer.
pub enum WriteMode {
    /// Delete every existing row, then load the table.
    Replace,
    /// Add the table's rows to the existing ones.
    Append,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
/// Rows of one layer, borrowed from an [`AggregateReport`].
pub enum LayerRows<'report> {
    /// Facility rows.
    Facilities(&'report [FacilityMetrics]),
    /// County rows.
    Counties(&'report [CountySummary]),
    /// Statewide rows.
    Statewide(&'report [StateSummary]),
    /// Material share rows.
    Materials(Vec<&'report MaterialShare>),
}

#[derive(Debug, Clone, Serialize)]
/// A complete table destined for one layer.
pub struct LayerTable<'report> {
    /// Target layer.
    pub layer: LayerId,
    /// Rows to write.
    pub rows: LayerRows<'report>,
}

impl<'report> LayerTable<'report> {
    /// One table per layer, in publish order.
    #[must_use]
    pub fn from_report(report: &'report AggregateReport) -> Vec<Self> {
        LayerId::ALL
            .into_iter()
            .map(|layer| {
                let rows = match layer {
                    LayerId::Facilities => LayerRows::Facilities(&report.facilities),
                    LayerId::Counties => LayerRows::Counties(&report.counties),
                    LayerId::Statewide => LayerRows::Statewide(report.state.as_slice()),
                    LayerId::MaterialsRecycled => LayerRows::Materials(
                        report.materials_for(MaterialStream::Recycling).collect(),
                    ),
                    LayerId::MaterialsComposted => LayerRows::Materials(
                        report.materials_for(MaterialStream::Composting).collect(),
                    ),
                };
                Self { layer, rows }
            })
            .collect()
    }

    /// Number of rows in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.rows {
            LayerRows::Facilities(rows) => rows.len(),
            LayerRows::Counties(rows) => rows.len(),
            LayerRows::Statewide(rows) => rows.len(),
            LayerRows::Materials(rows) => rows.len(),
        }
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Each row as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Json`] when a row cannot be encoded.
    pub fn json_rows(&self) -> Result<Vec<serde_json::Value>, PortError> {
        let value = serde_json::to_value(&self.rows)?;
        match value {
            serde_json::Value::Array(rows) => Ok(rows),
            other => Err(PortError::Internal(format!(
                "layer {} did not encode as an array: {other}",
                self.layer
            ))),
        }
    }
}

#[async_trait]
/// Trait for backends that deliver the raw facility table.
pub trait RecordSource: Send + Sync {
    /// Short description of where the rows come from, for logs.
    fn describe(&self) -> String;

    /// Fetch every raw row that may belong to `year`.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the table cannot be read.
    async fn fetch_rows(&self, year: i32) -> Result<Vec<RawFacilityRow>, PortError>;
}

#[async_trait]
/// Trait for backends that accept published layer tables.
pub trait LayerSink: Send + Sync {
    /// Short description of the destination, for logs.
    fn describe(&self) -> String;

    /// Write `table` to the sink and return the number of rows accepted.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the sink rejects or fails the write.
    async fn write(&self, table: &LayerTable<'_>, mode: WriteMode) -> Result<usize, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_yields_empty_tables_for_every_layer() {
        let report = AggregateReport::empty(2023);
        let tables = LayerTable::from_report(&report);

        let layers: Vec<LayerId> = tables.iter().map(|table| table.layer).collect();
        assert_eq!(layers, LayerId::ALL.to_vec());
        assert!(tables.iter().all(LayerTable::is_empty));
    }

    #[test]
    fn json_rows_are_objects() {
        let report = AggregateReport::empty(2023);
        let tables = LayerTable::from_report(&report);
        let rows = tables
            .first()
            .map(LayerTable::json_rows)
            .transpose()
            .expect("encodes");
        assert_eq!(rows, Some(Vec::new()));
    }
}
