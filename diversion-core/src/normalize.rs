//! Canonicalization of raw facility rows into [`FacilityRecord`] values.
//!
//! Material labels are renamed through a single ordered [`RenameChain`].
//! Each label is matched against the rules once and the first hit decides its
//! category; a rule produces a category rather than another label, so no rule
//! ever sees the output of another.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::model::{
    FacilityId, FacilityRecord, FacilityStatus, Location, MaterialCategory, MaterialTonnage,
    RawFacilityRow, TonnageField,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// How a rename rule matches a raw label. Matching ignores case and
/// surrounding whitespace.
pub enum RenamePattern {
    /// The whole label equals the pattern.
    Exact(String),
    /// The label contains the pattern.
    Contains(String),
}

impl RenamePattern {
    fn matches(&self, label: &str) -> bool {
        match self {
            Self::Exact(pattern) => pattern.trim().to_lowercase() == label,
            Self::Contains(pattern) => label.contains(&pattern.trim().to_lowercase()),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Exact(pattern) | Self::Contains(pattern) => pattern.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Maps labels matching `pattern` onto `category`.
pub struct RenameRule {
    /// Label pattern.
    #[serde(flatten)]
    pub pattern: RenamePattern,
    /// Canonical category the label renames to.
    pub category: MaterialCategory,
}

impl RenameRule {
    /// Rule matching the whole label.
    #[must_use]
    pub fn exact(pattern: &str, category: MaterialCategory) -> Self {
        Self {
            pattern: RenamePattern::Exact(pattern.to_owned()),
            category,
        }
    }

    /// Rule matching any label that contains `pattern`.
    #[must_use]
    pub fn contains(pattern: &str, category: MaterialCategory) -> Self {
        Self {
            pattern: RenamePattern::Contains(pattern.to_owned()),
            category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
/// Ordered rename rules; the first match wins.
pub struct RenameChain {
    rules: Vec<RenameRule>,
}

impl RenameChain {
    /// Chain made of exactly `rules`.
    #[must_use]
    pub fn new(rules: Vec<RenameRule>) -> Self {
        Self { rules }
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[RenameRule] {
        &self.rules
    }

    /// Category for a raw label, or `None` when the label is unmapped.
    ///
    /// Canonical category names always map to themselves.
    #[must_use]
    pub fn resolve(&self, label: &str) -> Option<MaterialCategory> {
        let normalized = label.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(&normalized))
            .map(|rule| rule.category)
            .or_else(|| MaterialCategory::from_name(&normalized))
    }

    pub(crate) fn first_empty_pattern(&self) -> Option<usize> {
        self.rules.iter().position(|rule| rule.pattern.is_empty())
    }
}

impl Default for RenameChain {
    /// Labels seen in the annual facility reports over the years.
    fn default() -> Self {
        use MaterialCategory::{
            Batteries, Cardboard, Construction, Electronics, Glass, Metal, Mixed, Organics, Paper,
            Plastic, Rubber, Textiles, Tires, Wood,
        };

        Self::new(vec![
            RenameRule::exact("Comm. Organics", Organics),
            RenameRule::contains("organics", Organics),
            RenameRule::contains("yard trimmings", Organics),
            RenameRule::contains("food", Organics),
            RenameRule::contains("biosolids", Organics),
            RenameRule::exact("BFS", Organics),
            RenameRule::contains("other cm", Organics),
            RenameRule::contains("compostable", Organics),
            RenameRule::contains("corrugated", Cardboard),
            RenameRule::exact("OCC", Cardboard),
            RenameRule::contains("paper", Paper),
            RenameRule::contains("plastic", Plastic),
            RenameRule::contains("glass", Glass),
            RenameRule::contains("ferrous", Metal),
            RenameRule::contains("aluminum", Metal),
            RenameRule::contains("metal", Metal),
            RenameRule::contains("tire", Tires),
            RenameRule::contains("rubber", Rubber),
            RenameRule::contains("leather", Textiles),
            RenameRule::contains("textile", Textiles),
            RenameRule::contains("wood", Wood),
            RenameRule::contains("batter", Batteries),
            RenameRule::contains("electronic", Electronics),
            RenameRule::exact("e-waste", Electronics),
            RenameRule::contains("drywall", Construction),
            RenameRule::contains("c&d", Construction),
            RenameRule::contains("sw stream", Mixed),
            RenameRule::contains("municipal solid waste", Mixed),
        ])
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Why a raw row could not be normalized.
pub enum DataQualityIssue {
    /// The row carries no facility identifier.
    #[error("Missing facility identifier")]
    MissingFacilityId,
    /// No rename rule matches the material label.
    #[error("Unmapped material label: {0:?}")]
    UnmappedMaterial(String),
    /// The tonnage field name is not one the normalizer knows.
    #[error("Unknown tonnage field {field:?} for material {label:?}")]
    UnknownField {
        /// Raw material label.
        label: String,
        /// Raw field name.
        field: String,
    },
    /// Status text is neither open nor closed.
    #[error("Unknown facility status: {0:?}")]
    UnknownStatus(String),
    /// Calendar year is not a number.
    #[error("Invalid calendar year: {0:?}")]
    InvalidYear(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A rejected row together with the issue that rejected it.
pub struct DataQualityError {
    /// Zero-based position of the row in the source table.
    pub row: usize,
    /// Facility identifier, when the row had one.
    pub facility_id: Option<FacilityId>,
    /// What was wrong.
    pub issue: DataQualityIssue,
}

impl fmt::Display for DataQualityError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.facility_id {
            Some(id) => write!(formatter, "row {} (facility {id}): {}", self.row, self.issue),
            None => write!(formatter, "row {}: {}", self.row, self.issue),
        }
    }
}

impl std::error::Error for DataQualityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.issue)
    }
}

/// Largest tonnage a single cell may report. Anything above it is treated
/// like an unparseable value, which keeps every rollup sum finite.
const MAX_CELL_TONS: f64 = 1.0e12;

/// Parse a tonnage cell. Empty, unparseable, negative, non-finite and
/// implausibly large values all count as zero tons: no report for a material
/// means nothing was reported.
///
/// Returns the tons and whether a non-empty value had to be coerced.
#[must_use]
pub fn parse_tonnage(raw: Option<&str>) -> (f64, bool) {
    let Some(text) = raw.map(str::trim).filter(|text| !text.is_empty()) else {
        return (0.0, false);
    };

    match text.replace(',', "").parse::<f64>() {
        Ok(tons) if (0.0..=MAX_CELL_TONS).contains(&tons) => (tons, false),
        _ => (0.0, true),
    }
}

fn parse_coordinate(raw: Option<&str>, limit: f64) -> Option<f64> {
    raw.map(str::trim)
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|value| value.is_finite() && value.abs() <= limit)
}

/// Canonicalizes raw rows for the configured target year.
pub struct Normalizer<'cfg> {
    config: &'cfg PipelineConfig,
}

impl<'cfg> Normalizer<'cfg> {
    /// Normalizer bound to `config`.
    #[must_use]
    pub fn new(config: &'cfg PipelineConfig) -> Self {
        Self { config }
    }

    /// Normalize every row, collecting rejected rows instead of failing.
    #[must_use]
    pub fn normalize(&self, rows: &[RawFacilityRow]) -> NormalizedBatch {
        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        let mut other_years = 0_usize;
        let mut coerced_values = 0_usize;

        for (position, row) in rows.iter().enumerate() {
            match self.normalize_row(position, row) {
                Ok(RowOutcome::Record { record, coerced }) => {
                    coerced_values += coerced;
                    records.push(record);
                }
                Ok(RowOutcome::OtherYear(year)) => {
                    debug!(row = position, year, "skipping row for another year");
                    other_years += 1;
                }
                Err(err) => {
                    warn!(row = position, error = %err, "rejecting row");
                    rejected.push(err);
                }
            }
        }

        debug!(
            year = self.config.year,
            records = records.len(),
            rejected = rejected.len(),
            other_years,
            coerced_values,
            "normalized facility rows"
        );

        NormalizedBatch::new(
            self.config.year,
            records,
            rejected,
            other_years,
            coerced_values,
        )
    }

    fn normalize_row(
        &self,
        position: usize,
        row: &RawFacilityRow,
    ) -> Result<RowOutcome, DataQualityError> {
        let Some(id) = row
            .facility_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| FacilityId(id.to_owned()))
        else {
            return Err(DataQualityError {
                row: position,
                facility_id: None,
                issue: DataQualityIssue::MissingFacilityId,
            });
        };

        let reject = |issue| DataQualityError {
            row: position,
            facility_id: Some(id.clone()),
            issue,
        };

        let year = row
            .calendar_year
            .trim()
            .parse::<i32>()
            .map_err(|_err| reject(DataQualityIssue::InvalidYear(row.calendar_year.clone())))?;
        if year != self.config.year {
            return Ok(RowOutcome::OtherYear(year));
        }

        let status = FacilityStatus::parse(&row.status)
            .ok_or_else(|| reject(DataQualityIssue::UnknownStatus(row.status.clone())))?;

        let mut materials = BTreeMap::<MaterialCategory, MaterialTonnage>::new();
        let mut coerced = 0_usize;
        for entry in &row.materials {
            let category = self
                .config
                .rename
                .resolve(&entry.label)
                .ok_or_else(|| reject(DataQualityIssue::UnmappedMaterial(entry.label.clone())))?;
            let field = TonnageField::parse(&entry.field).ok_or_else(|| {
                reject(DataQualityIssue::UnknownField {
                    label: entry.label.clone(),
                    field: entry.field.clone(),
                })
            })?;

            let (tons, was_coerced) = parse_tonnage(entry.value.as_deref());
            if was_coerced {
                coerced += 1;
            }
            materials.entry(category).or_default().add(field, tons);
        }

        let location = parse_coordinate(row.latitude.as_deref(), 90.0)
            .zip(parse_coordinate(row.longitude.as_deref(), 180.0))
            .map(|(latitude, longitude)| Location {
                latitude,
                longitude,
            });

        Ok(RowOutcome::Record {
            record: FacilityRecord {
                id,
                year,
                name: row.name.trim().to_owned(),
                county: row.county.trim().to_owned(),
                status,
                location,
                last_modified: row.last_modified,
                position,
                materials,
            },
            coerced,
        })
    }
}

enum RowOutcome {
    Record {
        record: FacilityRecord,
        coerced: usize,
    },
    OtherYear(i32),
}

/// Ordering key for picking the latest report of a facility: the newest
/// modification time wins and source position breaks ties.
pub(crate) fn report_order(record: &FacilityRecord) -> (Option<chrono::NaiveDateTime>, usize) {
    (record.last_modified, record.position)
}

#[derive(Debug, Clone, PartialEq)]
/// Normalized records for one year plus the rows that were rejected.
pub struct NormalizedBatch {
    year: i32,
    records: Vec<FacilityRecord>,
    rejected: Vec<DataQualityError>,
    other_years: usize,
    coerced_values: usize,
    closed: BTreeSet<FacilityId>,
}

impl NormalizedBatch {
    fn new(
        year: i32,
        records: Vec<FacilityRecord>,
        rejected: Vec<DataQualityError>,
        other_years: usize,
        coerced_values: usize,
    ) -> Self {
        let mut latest = BTreeMap::<&FacilityId, &FacilityRecord>::new();
        for record in &records {
            latest
                .entry(&record.id)
                .and_modify(|current| {
                    if report_order(record) >= report_order(current) {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
        let closed = latest
            .into_values()
            .filter(|record| record.status.is_closed())
            .map(|record| record.id.clone())
            .collect();

        Self {
            year,
            records,
            rejected,
            other_years,
            coerced_values,
            closed,
        }
    }

    /// Target year of the batch.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Rows that failed normalization.
    #[must_use]
    pub fn rejected(&self) -> &[DataQualityError] {
        &self.rejected
    }

    /// Number of rows skipped because they belonged to another year.
    #[must_use]
    pub fn other_years(&self) -> usize {
        self.other_years
    }

    /// Number of non-empty tonnage cells coerced to zero.
    #[must_use]
    pub fn coerced_values(&self) -> usize {
        self.coerced_values
    }

    /// Every normalized record, closed facilities included.
    #[must_use]
    pub fn for_publish(&self) -> FacilityView<'_> {
        FacilityView {
            year: self.year,
            records: &self.records,
            excluded: None,
        }
    }

    /// Records of facilities whose latest report is open.
    #[must_use]
    pub fn for_validation(&self) -> FacilityView<'_> {
        FacilityView {
            year: self.year,
            records: &self.records,
            excluded: Some(&self.closed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
/// Read-only projection over the records of a [`NormalizedBatch`].
pub struct FacilityView<'batch> {
    year: i32,
    records: &'batch [FacilityRecord],
    excluded: Option<&'batch BTreeSet<FacilityId>>,
}

impl<'batch> FacilityView<'batch> {
    /// View over records that did not come from a batch, e.g. in tests.
    #[must_use]
    pub fn all(year: i32, records: &'batch [FacilityRecord]) -> Self {
        Self {
            year,
            records,
            excluded: None,
        }
    }

    /// Target year of the underlying batch.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Records visible through this view, in source order.
    pub fn iter(&self) -> impl Iterator<Item = &'batch FacilityRecord> + 'batch {
        let excluded = self.excluded;
        let records = self.records;
        records
            .iter()
            .filter(move |record| excluded.is_none_or(|closed| !closed.contains(&record.id)))
    }

    /// Number of visible records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no record is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::model::RawMaterialEntry;

    fn entry(label: &str, field: &str, value: Option<&str>) -> RawMaterialEntry {
        RawMaterialEntry {
            label: label.to_owned(),
            field: field.to_owned(),
            value: value.map(str::to_owned),
        }
    }

    fn row(id: Option<&str>, status: &str, materials: Vec<RawMaterialEntry>) -> RawFacilityRow {
        RawFacilityRow {
            facility_id: id.map(str::to_owned),
            name: "Facility".to_owned(),
            county: "Cache".to_owned(),
            status: status.to_owned(),
            latitude: Some("41.73".to_owned()),
            longitude: Some("-111.83".to_owned()),
            calendar_year: "2023".to_owned(),
            last_modified: None,
            materials,
        }
    }

    #[test]
    fn legacy_label_renames_to_canonical_category() {
        let chain = RenameChain::default();
        assert_eq!(chain.resolve("Comm. Organics"), Some(MaterialCategory::Organics));
        assert_eq!(
            chain.resolve("Total Corrugated Boxes received"),
            Some(MaterialCategory::Cardboard)
        );
        assert_eq!(
            chain.resolve("Total Paper and Paperboard received"),
            Some(MaterialCategory::Paper)
        );
        assert_eq!(chain.resolve("Total Tires received"), Some(MaterialCategory::Tires));
        assert_eq!(chain.resolve("glass"), Some(MaterialCategory::Glass));
        assert_eq!(chain.resolve("Mystery Sludge"), None);
        assert_eq!(chain.resolve("   "), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let chain = RenameChain::new(vec![
            RenameRule::contains("paper", MaterialCategory::Paper),
            RenameRule::contains("paperboard", MaterialCategory::Cardboard),
        ]);
        assert_eq!(chain.resolve("Paperboard"), Some(MaterialCategory::Paper));
    }

    #[test]
    fn rule_output_is_never_renamed_again() {
        // "Metal" would match the second rule if outputs were fed back in.
        let chain = RenameChain::new(vec![
            RenameRule::exact("scrap", MaterialCategory::Metal),
            RenameRule::contains("metal", MaterialCategory::Mixed),
        ]);
        assert_eq!(chain.resolve("scrap"), Some(MaterialCategory::Metal));
    }

    #[test]
    fn empty_and_malformed_tonnage_is_zero() {
        assert_eq!(parse_tonnage(None), (0.0, false));
        assert_eq!(parse_tonnage(Some("  ")), (0.0, false));
        assert_eq!(parse_tonnage(Some("n/a")), (0.0, true));
        assert_eq!(parse_tonnage(Some("-4")), (0.0, true));
        assert_eq!(parse_tonnage(Some("NaN")), (0.0, true));
        assert_eq!(parse_tonnage(Some("1,250.5")), (1250.5, false));
        assert_eq!(parse_tonnage(Some("1e308")), (0.0, true));
        assert_eq!(parse_tonnage(Some("inf")), (0.0, true));
    }

    #[test]
    fn missing_identifier_rejects_only_that_row() {
        let config = PipelineConfig::new(2023);
        let rows = vec![
            row(None, "Open", vec![entry("Paper", "recycled", Some("5"))]),
            row(Some("SW01"), "Open", vec![entry("Paper", "recycled", Some("5"))]),
        ];

        let batch = Normalizer::new(&config).normalize(&rows);

        assert_eq!(batch.for_publish().len(), 1);
        assert_eq!(
            batch.rejected(),
            &[DataQualityError {
                row: 0,
                facility_id: None,
                issue: DataQualityIssue::MissingFacilityId,
            }]
        );
    }

    #[test]
    fn unmapped_label_is_reported_with_the_label() {
        let config = PipelineConfig::new(2023);
        let rows = vec![row(
            Some("SW02"),
            "Open",
            vec![entry("Mystery Sludge", "recycled", Some("5"))],
        )];

        let batch = Normalizer::new(&config).normalize(&rows);

        assert!(batch.for_publish().is_empty());
        let [rejection] = batch.rejected() else {
            panic!("expected one rejection, got {:?}", batch.rejected());
        };
        assert_eq!(rejection.facility_id, Some(FacilityId("SW02".to_owned())));
        assert_eq!(
            rejection.issue,
            DataQualityIssue::UnmappedMaterial("Mystery Sludge".to_owned())
        );
        assert!(rejection.to_string().contains("Mystery Sludge"));
    }

    #[test]
    fn labels_sharing_a_category_are_summed() {
        let config = PipelineConfig::new(2023);
        let rows = vec![row(
            Some("SW03"),
            "Open",
            vec![
                entry("Comm. Organics", "composted", Some("10")),
                entry("Yard Trimmings", "composted", Some("2.5")),
                entry("Food", "composted", None),
                entry("Paper", "landfilled", Some("7")),
            ],
        )];

        let batch = Normalizer::new(&config).normalize(&rows);
        let record = batch.for_publish().iter().next().expect("record");

        let organics = record.materials[&MaterialCategory::Organics];
        assert!((organics.composted - 12.5).abs() < f64::EPSILON);
        assert!((record.materials[&MaterialCategory::Paper].disposed - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn other_years_are_skipped_and_bad_years_rejected() {
        let config = PipelineConfig::new(2023);
        let mut old = row(Some("SW04"), "Open", Vec::new());
        old.calendar_year = "2022".to_owned();
        let mut bad = row(Some("SW05"), "Open", Vec::new());
        bad.calendar_year = "twenty".to_owned();

        let batch = Normalizer::new(&config).normalize(&[old, bad]);

        assert_eq!(batch.other_years(), 1);
        assert!(matches!(
            batch.rejected(),
            [DataQualityError {
                issue: DataQualityIssue::InvalidYear(_),
                ..
            }]
        ));
    }

    #[test]
    fn validation_view_drops_closed_facilities() {
        let config = PipelineConfig::new(2023);
        let rows = vec![
            row(Some("SW10"), "Open", Vec::new()),
            row(Some("SW11"), "CLOSED", Vec::new()),
        ];

        let batch = Normalizer::new(&config).normalize(&rows);

        assert_eq!(batch.for_publish().len(), 2);
        let validated: Vec<_> = batch
            .for_validation()
            .iter()
            .map(|record| record.id.0.as_str())
            .collect();
        assert_eq!(validated, vec!["SW10"]);
    }

    #[test]
    fn closure_follows_the_latest_duplicate() {
        let config = PipelineConfig::new(2023);
        let stamp = |day| {
            NaiveDate::from_ymd_opt(2024, 1, day)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        };
        let mut reopened = row(Some("SW12"), "Open", Vec::new());
        reopened.last_modified = stamp(20);
        let mut closed = row(Some("SW12"), "Closed", Vec::new());
        closed.last_modified = stamp(2);

        let batch = Normalizer::new(&config).normalize(&[reopened, closed]);

        assert_eq!(batch.for_validation().len(), 2);
    }

    #[test]
    fn unparseable_coordinates_leave_location_empty() {
        let config = PipelineConfig::new(2023);
        let mut unlocated = row(Some("SW13"), "Open", Vec::new());
        unlocated.latitude = Some("north-ish".to_owned());

        let batch = Normalizer::new(&config).normalize(&[unlocated]);
        let record = batch.for_publish().iter().next().expect("record");

        assert_eq!(record.location, None);
    }
}
