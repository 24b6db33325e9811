//! Year-over-year comparison of aggregated metrics.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{MetricThreshold, Thresholds};
use crate::metrics::{AggregateReport, Measures, Metric};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Level of the entity a finding is about. Ordered facility, county, state.
pub enum EntityLevel {
    /// A single facility.
    Facility,
    /// A real county.
    County,
    /// The whole state.
    State,
}

impl fmt::Display for EntityLevel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Facility => "facility",
            Self::County => "county",
            Self::State => "state",
        };
        write!(formatter, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Which delta triggered a finding.
pub enum DeltaKind {
    /// The absolute change, used when the prior value is zero.
    Absolute,
    /// The percentage change.
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// How far past its threshold a change went.
pub enum Severity {
    /// Less than twice the threshold.
    Notice,
    /// Two to four times the threshold.
    Warning,
    /// Four times the threshold or more.
    Critical,
}

impl Severity {
    fn from_excess(excess: f64) -> Self {
        if excess >= 4.0 {
            Self::Critical
        } else if excess >= 2.0 {
            Self::Warning
        } else {
            Self::Notice
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        write!(formatter, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A metric whose year-over-year change exceeded its threshold.
pub struct ValidationFinding {
    /// Facility, county, or state.
    pub level: EntityLevel,
    /// Facility id, county name, or `state`.
    pub entity_id: String,
    /// Human-readable entity name.
    pub entity_name: String,
    /// Metric that moved.
    pub metric: Metric,
    /// Prior-year value.
    pub prior: f64,
    /// Current-year value.
    pub current: f64,
    /// `current - prior`.
    pub absolute_delta: f64,
    /// Percentage change; `None` when the prior value is zero.
    pub percent_delta: Option<f64>,
    /// Delta that triggered the finding.
    pub delta_kind: DeltaKind,
    /// How far past the threshold the change went.
    pub severity: Severity,
}

impl fmt::Display for ValidationFinding {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "[{}] {} {} ({}): {} {:.3} -> {:.3} ",
            self.severity,
            self.level,
            self.entity_id,
            self.entity_name,
            self.metric,
            self.prior,
            self.current,
        )?;
        match self.percent_delta {
            Some(percent) => write!(formatter, "({:+.3}, {percent:+.1}%)", self.absolute_delta),
            None => write!(formatter, "({:+.3}, from zero)", self.absolute_delta),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Number of entities present in both years, per level.
pub struct ComparedCounts {
    /// Facilities compared.
    pub facilities: usize,
    /// Counties compared.
    pub counties: usize,
    /// Whether the state rows were compared.
    pub state: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Findings of a comparison that actually ran.
pub struct ValidationReport {
    /// Year being validated.
    pub current_year: i32,
    /// Baseline year.
    pub prior_year: i32,
    /// Entities that were present in both years.
    pub compared: ComparedCounts,
    /// Findings ordered facility, county, state, and by descending severity within a level.
    pub findings: Vec<ValidationFinding>,
}

impl ValidationReport {
    /// Findings of a single level, in report order.
    pub fn findings_at(&self, level: EntityLevel) -> impl Iterator<Item = &ValidationFinding> {
        self.findings
            .iter()
            .filter(move |finding| finding.level == level)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
/// Why no comparison could be made.
pub enum BaselineIssue {
    /// No prior-year metrics were supplied.
    #[error("No prior-year baseline was supplied")]
    Missing,
    /// The baseline holds no rows.
    #[error("Prior-year baseline for {year} is empty")]
    Empty {
        /// Year the empty baseline claims to cover.
        year: i32,
    },
    /// The baseline is not for the year before the current one.
    #[error("Baseline covers {found}, expected {expected}")]
    WrongYear {
        /// Year immediately preceding the current one.
        expected: i32,
        /// Year the baseline covers.
        found: i32,
    },
    /// The baseline could not be read by the caller.
    #[error("Baseline could not be loaded: {detail}")]
    Unreadable {
        /// Loader error text.
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
/// Result of a validation run.
///
/// `BaselineUnavailable` means the comparison never ran, which is not the
/// same as a comparison that found nothing.
pub enum ValidationOutcome {
    /// The comparison ran.
    Compared(ValidationReport),
    /// The comparison could not run.
    BaselineUnavailable {
        /// Why.
        reason: BaselineIssue,
    },
}

impl ValidationOutcome {
    /// Findings, if the comparison ran.
    #[must_use]
    pub fn findings(&self) -> Option<&[ValidationFinding]> {
        match self {
            Self::Compared(report) => Some(&report.findings),
            Self::BaselineUnavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Deltas of one metric and the verdict on them.
pub struct Assessment {
    /// `current - prior`.
    pub absolute_delta: f64,
    /// Percentage change, `None` when the prior value is zero.
    pub percent_delta: Option<f64>,
    /// Delta kind and severity when the change should be reported.
    pub flagged: Option<(DeltaKind, Severity)>,
}

/// Judge the change of one metric against its threshold.
///
/// Changes whose absolute delta does not exceed the floor are never flagged.
/// Past the floor a change is flagged when its percentage exceeds the ceiling,
/// or, when the prior value is zero and no percentage exists, on the absolute
/// delta alone.
#[must_use]
pub fn assess(prior: f64, current: f64, threshold: MetricThreshold) -> Assessment {
    let absolute_delta = current - prior;
    let percent_delta = (prior.abs() > f64::EPSILON).then(|| absolute_delta / prior.abs() * 100.0);

    let flagged = if absolute_delta.abs() <= threshold.absolute_floor {
        None
    } else {
        match percent_delta {
            Some(percent) if percent.abs() > threshold.percent_ceiling => Some((
                DeltaKind::Percentage,
                Severity::from_excess(percent.abs() / threshold.percent_ceiling),
            )),
            Some(_) => None,
            None => Some((
                DeltaKind::Absolute,
                Severity::from_excess(absolute_delta.abs() / threshold.absolute_floor),
            )),
        }
    };

    Assessment {
        absolute_delta,
        percent_delta,
        flagged,
    }
}

struct Entity<'report> {
    id: String,
    name: String,
    measures: &'report Measures,
}

/// Compares a current-year report with the prior year's.
pub struct Validator<'cfg> {
    thresholds: &'cfg Thresholds,
}

impl<'cfg> Validator<'cfg> {
    /// Validator using `thresholds`.
    #[must_use]
    pub fn new(thresholds: &'cfg Thresholds) -> Self {
        Self { thresholds }
    }

    /// Compare `current` against `prior`.
    ///
    /// Facilities closed in either year, and entities present in only one of
    /// the years, are not compared.
    #[must_use]
    pub fn validate(
        &self,
        current: &AggregateReport,
        prior: Option<&AggregateReport>,
    ) -> ValidationOutcome {
        let prior = match check_baseline(current.year, prior) {
            Ok(prior) => prior,
            Err(reason) => {
                warn!(year = current.year, %reason, "year-over-year validation did not run");
                return ValidationOutcome::BaselineUnavailable { reason };
            }
        };

        let mut compared = ComparedCounts::default();
        let mut findings = Vec::new();

        let (count, mut facility_findings) = self.compare_level(
            EntityLevel::Facility,
            facility_entities(prior),
            facility_entities(current),
        );
        compared.facilities = count;
        findings.append(&mut facility_findings);

        let (count, mut county_findings) = self.compare_level(
            EntityLevel::County,
            county_entities(prior),
            county_entities(current),
        );
        compared.counties = count;
        findings.append(&mut county_findings);

        let (count, mut state_findings) = self.compare_level(
            EntityLevel::State,
            state_entity(prior),
            state_entity(current),
        );
        compared.state = count > 0;
        findings.append(&mut state_findings);

        info!(
            current_year = current.year,
            prior_year = prior.year,
            facilities = compared.facilities,
            counties = compared.counties,
            findings = findings.len(),
            "year-over-year validation finished"
        );

        ValidationOutcome::Compared(ValidationReport {
            current_year: current.year,
            prior_year: prior.year,
            compared,
            findings,
        })
    }

    fn compare_level(
        &self,
        level: EntityLevel,
        prior: Vec<Entity<'_>>,
        current: Vec<Entity<'_>>,
    ) -> (usize, Vec<ValidationFinding>) {
        let prior: BTreeMap<String, Entity<'_>> = prior
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect();

        let mut compared = 0_usize;
        let mut findings = Vec::new();
        for entity in current {
            let Some(before) = prior.get(&entity.id) else {
                continue;
            };
            compared += 1;

            for metric in Metric::ALL {
                let prior_value = before.measures.value(metric);
                let current_value = entity.measures.value(metric);
                let assessment = assess(prior_value, current_value, self.thresholds.for_metric(metric));
                if let Some((delta_kind, severity)) = assessment.flagged {
                    findings.push(ValidationFinding {
                        level,
                        entity_id: entity.id.clone(),
                        entity_name: entity.name.clone(),
                        metric,
                        prior: prior_value,
                        current: current_value,
                        absolute_delta: assessment.absolute_delta,
                        percent_delta: assessment.percent_delta,
                        delta_kind,
                        severity,
                    });
                }
            }
        }

        findings.sort_by(|left, right| {
            (Reverse(left.severity), &left.entity_id, left.metric).cmp(&(
                Reverse(right.severity),
                &right.entity_id,
                right.metric,
            ))
        });

        (compared, findings)
    }
}

fn check_baseline(
    current_year: i32,
    prior: Option<&AggregateReport>,
) -> Result<&AggregateReport, BaselineIssue> {
    let prior = prior.ok_or(BaselineIssue::Missing)?;
    if prior.is_empty() {
        return Err(BaselineIssue::Empty { year: prior.year });
    }
    let expected = current_year - 1;
    if prior.year != expected {
        return Err(BaselineIssue::WrongYear {
            expected,
            found: prior.year,
        });
    }
    Ok(prior)
}

fn facility_entities(report: &AggregateReport) -> Vec<Entity<'_>> {
    report
        .facilities
        .iter()
        .filter(|facility| !facility.closed)
        .map(|facility| Entity {
            id: facility.id.0.clone(),
            name: facility.name.clone(),
            measures: &facility.measures,
        })
        .collect()
}

fn county_entities(report: &AggregateReport) -> Vec<Entity<'_>> {
    report
        .real_counties()
        .map(|county| Entity {
            id: county.name.clone(),
            name: county.name.clone(),
            measures: &county.measures,
        })
        .collect()
}

fn state_entity(report: &AggregateReport) -> Vec<Entity<'_>> {
    report
        .state
        .iter()
        .map(|state| Entity {
            id: "state".to_owned(),
            name: "Statewide".to_owned(),
            measures: &state.measures,
        })
        .collect()
}
