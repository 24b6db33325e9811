//! Facility metrics and their county and state rollups.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::metrics::{
    AggregateReport, CountyRowKind, CountySummary, DuplicateEntry, FacilityMetrics,
    MaterialBreakdown, MaterialShare, MaterialStream, Measures, STATEWIDE_TOTAL_LABEL,
    StateSummary, merge_breakdown, ratio,
};
use crate::model::{FacilityId, FacilityRecord, MaterialCategory, MaterialTonnage};
use crate::normalize::{FacilityView, report_order};

/// Records left after deduplication plus the facilities that had duplicates.
#[derive(Debug)]
pub struct Deduplicated<'batch> {
    /// One record per facility and year, ordered by facility id.
    pub records: Vec<&'batch FacilityRecord>,
    /// Facilities that appeared more than once.
    pub duplicates: Vec<DuplicateEntry>,
}

/// Keep exactly one record per facility and year: the latest report by
/// modification time, later source rows winning ties.
#[must_use]
pub fn deduplicate<'batch>(
    records: impl IntoIterator<Item = &'batch FacilityRecord>,
) -> Deduplicated<'batch> {
    let mut latest = BTreeMap::<(&FacilityId, i32), (&FacilityRecord, usize)>::new();

    for record in records {
        latest
            .entry((&record.id, record.year))
            .and_modify(|(current, seen)| {
                *seen += 1;
                if report_order(record) >= report_order(current) {
                    *current = record;
                }
            })
            .or_insert((record, 1));
    }

    let duplicates = latest
        .values()
        .filter(|(_, seen)| *seen > 1)
        .map(|(record, seen)| DuplicateEntry {
            facility_id: record.id.clone(),
            rows: *seen,
        })
        .collect();

    Deduplicated {
        records: latest.into_values().map(|(record, _)| record).collect(),
        duplicates,
    }
}

/// Metrics for a single facility record.
#[must_use]
pub fn facility_metrics(record: &FacilityRecord) -> FacilityMetrics {
    let materials = record
        .materials
        .iter()
        .map(|(category, tonnage)| (*category, (*tonnage).into()))
        .collect();

    FacilityMetrics {
        id: record.id.clone(),
        name: record.name.clone(),
        county: record.county.clone(),
        year: record.year,
        closed: record.status.is_closed(),
        location: record.location,
        measures: Measures::from_tonnage(record.total_tonnage()),
        materials,
    }
}

#[derive(Default)]
struct Rollup {
    tonnage: MaterialTonnage,
    facility_count: usize,
    materials: MaterialBreakdown,
}

impl Rollup {
    fn absorb(&mut self, tonnage: MaterialTonnage, facilities: usize, materials: &MaterialBreakdown) {
        self.tonnage += tonnage;
        self.facility_count += facilities;
        merge_breakdown(&mut self.materials, materials);
    }
}

/// County rows for the open facilities, ordered by county name, followed by
/// the synthetic statewide total row.
///
/// Rates are re-derived from summed tonnage. No rows at all are produced when
/// there is no open facility.
#[must_use]
pub fn county_summaries(year: i32, facilities: &[FacilityMetrics]) -> Vec<CountySummary> {
    let mut counties = BTreeMap::<&str, Rollup>::new();
    for facility in facilities.iter().filter(|facility| !facility.closed) {
        counties.entry(facility.county.as_str()).or_default().absorb(
            facility.measures.tonnage(),
            1,
            &facility.materials,
        );
    }

    if counties.is_empty() {
        return Vec::new();
    }

    let mut statewide = Rollup::default();
    let mut rows = Vec::with_capacity(counties.len() + 1);
    for (name, rollup) in counties {
        statewide.absorb(rollup.tonnage, rollup.facility_count, &rollup.materials);
        rows.push(CountySummary {
            name: name.to_owned(),
            kind: CountyRowKind::County,
            year,
            facility_count: rollup.facility_count,
            measures: Measures::from_tonnage(rollup.tonnage),
            materials: rollup.materials,
        });
    }

    rows.push(CountySummary {
        name: STATEWIDE_TOTAL_LABEL.to_owned(),
        kind: CountyRowKind::StatewideTotal,
        year,
        facility_count: statewide.facility_count,
        measures: Measures::from_tonnage(statewide.tonnage),
        materials: statewide.materials,
    });

    rows
}

/// Statewide summary summed from the real county rows only.
///
/// The synthetic statewide row is skipped, so it never counts twice.
#[must_use]
pub fn state_summary(year: i32, counties: &[CountySummary]) -> Option<StateSummary> {
    let mut state = Rollup::default();
    let mut county_count = 0_usize;

    for county in counties.iter().filter(|county| !county.is_statewide_total()) {
        state.absorb(county.measures.tonnage(), county.facility_count, &county.materials);
        county_count += 1;
    }

    (county_count > 0).then(|| StateSummary {
        year,
        county_count,
        facility_count: state.facility_count,
        measures: Measures::from_tonnage(state.tonnage),
        materials: state.materials,
    })
}

/// Statewide tons and stream share of every category, recycling rows first.
#[must_use]
pub fn material_shares(state: &StateSummary) -> Vec<MaterialShare> {
    let streams = [
        (MaterialStream::Recycling, state.measures.recycled_tons),
        (MaterialStream::Composting, state.measures.composted_tons),
    ];

    streams
        .into_iter()
        .flat_map(|(stream, stream_total)| {
            MaterialCategory::ALL.into_iter().map(move |category| {
                let totals = state.materials.get(&category).copied().unwrap_or_default();
                let tons = match stream {
                    MaterialStream::Recycling => totals.recycled,
                    MaterialStream::Composting => totals.composted,
                };
                MaterialShare {
                    year: state.year,
                    stream,
                    category,
                    tons,
                    share: ratio(tons, stream_total),
                }
            })
        })
        .collect()
}

/// Aggregate every record visible through `view` into a full report.
///
/// An empty view yields an empty report rather than an error.
#[must_use]
pub fn aggregate(view: FacilityView<'_>) -> AggregateReport {
    let year = view.year();
    let Deduplicated {
        records,
        duplicates,
    } = deduplicate(view.iter());

    for duplicate in &duplicates {
        warn!(
            facility = %duplicate.facility_id,
            rows = duplicate.rows,
            year,
            "duplicate facility reports; keeping the latest"
        );
    }

    if records.is_empty() {
        warn!(year, "no facility records to aggregate");
        return AggregateReport {
            duplicates,
            ..AggregateReport::empty(year)
        };
    }

    let facilities: Vec<FacilityMetrics> = records.into_iter().map(facility_metrics).collect();
    let counties = county_summaries(year, &facilities);
    let state = state_summary(year, &counties);
    let materials = state.as_ref().map(material_shares).unwrap_or_default();

    info!(
        year,
        facilities = facilities.len(),
        counties = counties.len().saturating_sub(1),
        diverted_tons = state.as_ref().map_or(0.0, |state| state.measures.diverted_tons),
        "aggregated facility metrics"
    );

    AggregateReport {
        year,
        facilities,
        counties,
        state,
        materials,
        duplicates,
    }
}
