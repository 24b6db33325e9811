//! Derived metric rows at facility, county, and state level.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::model::{FacilityId, Location, MaterialCategory, MaterialTonnage};

/// Label of the synthetic county row that carries the statewide total.
pub const STATEWIDE_TOTAL_LABEL: &str = "Statewide Total";

/// Divide `numerator` by `denominator`, yielding zero for an empty or invalid
/// denominator and clamping the result to `[0, 1]`.
#[must_use]
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if !denominator.is_finite() || denominator <= 0.0 || !numerator.is_finite() {
        return 0.0;
    }
    (numerator / denominator).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Metrics compared between years.
pub enum Metric {
    /// Recycled plus composted tons.
    DivertedTons,
    /// Recycled tons.
    RecycledTons,
    /// Composted tons.
    CompostedTons,
    /// Disposed tons.
    DisposedTons,
    /// Diverted share of generated tons.
    RecoveryRate,
    /// Uncontaminated share of recycled tons.
    UncontaminationRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Unit family of a metric, which selects its default thresholds.
pub enum MetricKind {
    /// Measured in tons.
    Tonnage,
    /// Ratio in `[0, 1]`.
    Rate,
}

impl Metric {
    /// Every metric in report order.
    pub const ALL: [Self; 6] = [
        Self::DivertedTons,
        Self::RecycledTons,
        Self::CompostedTons,
        Self::DisposedTons,
        Self::RecoveryRate,
        Self::UncontaminationRate,
    ];

    /// Column-style metric name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DivertedTons => "diverted_tons",
            Self::RecycledTons => "recycled_tons",
            Self::CompostedTons => "composted_tons",
            Self::DisposedTons => "disposed_tons",
            Self::RecoveryRate => "recovery_rate",
            Self::UncontaminationRate => "uncontamination_rate",
        }
    }

    /// Unit family of the metric.
    #[must_use]
    pub fn kind(self) -> MetricKind {
        match self {
            Self::RecoveryRate | Self::UncontaminationRate => MetricKind::Rate,
            _ => MetricKind::Tonnage,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
/// Tonnage fields plus the rates derived from them.
///
/// Rates are always derived from the summed tonnage held in the same value,
/// so a rollup is a rate of sums rather than a mean of rates.
pub struct Measures {
    /// Tons recycled.
    pub recycled_tons: f64,
    /// Tons composted.
    pub composted_tons: f64,
    /// Tons disposed.
    pub disposed_tons: f64,
    /// Contaminated tons within the recycled tons.
    pub contamination_tons: f64,
    /// Out-of-state tons, kept apart from the in-state diversion figures.
    pub out_of_state_tons: f64,
    /// Recycled plus composted tons.
    pub diverted_tons: f64,
    /// `diverted / (diverted + disposed)`.
    pub recovery_rate: f64,
    /// `(recycled - contamination) / recycled`.
    pub uncontamination_rate: f64,
}

impl Measures {
    /// Derive measures from summed tonnage.
    #[must_use]
    pub fn from_tonnage(tonnage: MaterialTonnage) -> Self {
        let diverted = tonnage.recycled + tonnage.composted;
        Self {
            recycled_tons: tonnage.recycled,
            composted_tons: tonnage.composted,
            disposed_tons: tonnage.disposed,
            contamination_tons: tonnage.contamination,
            out_of_state_tons: tonnage.out_of_state,
            diverted_tons: diverted,
            recovery_rate: ratio(diverted, diverted + tonnage.disposed),
            uncontamination_rate: ratio(
                tonnage.recycled - tonnage.contamination,
                tonnage.recycled,
            ),
        }
    }

    /// The raw tonnage these measures were derived from.
    #[must_use]
    pub fn tonnage(&self) -> MaterialTonnage {
        MaterialTonnage {
            recycled: self.recycled_tons,
            composted: self.composted_tons,
            disposed: self.disposed_tons,
            contamination: self.contamination_tons,
            out_of_state: self.out_of_state_tons,
        }
    }

    /// Value of a single metric.
    #[must_use]
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::DivertedTons => self.diverted_tons,
            Metric::RecycledTons => self.recycled_tons,
            Metric::CompostedTons => self.composted_tons,
            Metric::DisposedTons => self.disposed_tons,
            Metric::RecoveryRate => self.recovery_rate,
            Metric::UncontaminationRate => self.uncontamination_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
/// Recycled and composted tons for one material category.
pub struct MaterialTotals {
    /// Tons recycled.
    pub recycled: f64,
    /// Tons composted.
    pub composted: f64,
}

impl AddAssign for MaterialTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.recycled += rhs.recycled;
        self.composted += rhs.composted;
    }
}

impl From<MaterialTonnage> for MaterialTotals {
    fn from(tonnage: MaterialTonnage) -> Self {
        Self {
            recycled: tonnage.recycled,
            composted: tonnage.composted,
        }
    }
}

/// Per-category totals keyed by canonical category.
pub type MaterialBreakdown = BTreeMap<MaterialCategory, MaterialTotals>;

/// Add every category of `source` into `target`.
pub fn merge_breakdown(target: &mut MaterialBreakdown, source: &MaterialBreakdown) {
    for (category, totals) in source {
        *target.entry(*category).or_default() += *totals;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Metrics for one facility and year.
pub struct FacilityMetrics {
    /// Facility identifier.
    pub id: FacilityId,
    /// Facility display name.
    pub name: String,
    /// County name.
    pub county: String,
    /// Reporting year.
    pub year: i32,
    /// Closed facilities are published but excluded from rollups and validation.
    pub closed: bool,
    /// Facility location, if known.
    pub location: Option<Location>,
    /// Tonnage and rates.
    #[serde(flatten)]
    pub measures: Measures,
    /// Recycled and composted tons per category.
    pub materials: MaterialBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Distinguishes real county rows from the synthetic statewide row.
pub enum CountyRowKind {
    /// A real county.
    County,
    /// Synthetic sum of all real counties.
    StatewideTotal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Rollup of the open facilities in one county.
pub struct CountySummary {
    /// County name, or [`STATEWIDE_TOTAL_LABEL`] for the synthetic row.
    pub name: String,
    /// Whether this is a real county or the statewide total.
    pub kind: CountyRowKind,
    /// Reporting year.
    pub year: i32,
    /// Number of facilities summed into this row.
    pub facility_count: usize,
    /// Tonnage and rates.
    #[serde(flatten)]
    pub measures: Measures,
    /// Recycled and composted tons per category.
    pub materials: MaterialBreakdown,
}

impl CountySummary {
    /// Whether this row is the synthetic statewide total.
    #[must_use]
    pub fn is_statewide_total(&self) -> bool {
        self.kind == CountyRowKind::StatewideTotal
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Statewide rollup of every real county.
pub struct StateSummary {
    /// Reporting year.
    pub year: i32,
    /// Number of real counties summed.
    pub county_count: usize,
    /// Number of facilities across those counties.
    pub facility_count: usize,
    /// Tonnage and rates.
    #[serde(flatten)]
    pub measures: Measures,
    /// Recycled and composted tons per category.
    pub materials: MaterialBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Diversion stream a material share belongs to.
pub enum MaterialStream {
    /// Material sent to recycling.
    Recycling,
    /// Material sent to composting.
    Composting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Statewide tons of one category within one stream.
pub struct MaterialShare {
    /// Reporting year.
    pub year: i32,
    /// Recycling or composting.
    pub stream: MaterialStream,
    /// Material category.
    pub category: MaterialCategory,
    /// Tons of the category in the stream.
    pub tons: f64,
    /// Share of the stream's total tons, zero when the stream is empty.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A facility that appeared more than once for the reporting year.
pub struct DuplicateEntry {
    /// Facility identifier.
    pub facility_id: FacilityId,
    /// Number of rows seen for the facility.
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Everything one aggregation run produces for a single year.
///
/// The prior year's baseline is supplied to the validator in this same shape.
pub struct AggregateReport {
    /// Reporting year.
    pub year: i32,
    /// Facility rows ordered by facility id, closed facilities flagged.
    pub facilities: Vec<FacilityMetrics>,
    /// Real county rows ordered by name, followed by the statewide total row.
    pub counties: Vec<CountySummary>,
    /// Statewide summary; absent when no facility was aggregated.
    pub state: Option<StateSummary>,
    /// Statewide material shares for the recycling and composting streams.
    pub materials: Vec<MaterialShare>,
    /// Facilities that had duplicate rows.
    #[serde(default)]
    pub duplicates: Vec<DuplicateEntry>,
}

impl AggregateReport {
    /// Report with no rows at any level.
    #[must_use]
    pub fn empty(year: i32) -> Self {
        Self {
            year,
            facilities: Vec::new(),
            counties: Vec::new(),
            state: None,
            materials: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    /// Whether the report holds no facility, county, or state rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty() && self.counties.is_empty() && self.state.is_none()
    }

    /// Real county rows, without the synthetic statewide total.
    pub fn real_counties(&self) -> impl Iterator<Item = &CountySummary> {
        self.counties
            .iter()
            .filter(|county| !county.is_statewide_total())
    }

    /// The synthetic statewide total row, if present.
    #[must_use]
    pub fn statewide_row(&self) -> Option<&CountySummary> {
        self.counties
            .iter()
            .find(|county| county.is_statewide_total())
    }

    /// Material shares of a single stream.
    pub fn materials_for(&self, stream: MaterialStream) -> impl Iterator<Item = &MaterialShare> {
        self.materials
            .iter()
            .filter(move |share| share.stream == stream)
    }
}
