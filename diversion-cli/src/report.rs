use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use diversion_core::{
    AggregateReport, BaselineIssue, EntityLevel, NormalizedBatch, ValidationFinding,
    ValidationOutcome,
};

const LEVELS: [EntityLevel; 3] = [EntityLevel::Facility, EntityLevel::County, EntityLevel::State];

/// Human-readable report of a validation run.
pub(crate) fn render(batch: &NormalizedBatch, outcome: &ValidationOutcome) -> String {
    ValidationText { batch, outcome }.to_string()
}

struct ValidationText<'run> {
    batch: &'run NormalizedBatch,
    outcome: &'run ValidationOutcome,
}

impl fmt::Display for ValidationText<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let batch = self.batch;
        writeln!(out, "Diversion metrics validation for {}", batch.year())?;
        writeln!(
            out,
            "Rows: {} rejected, {} for other years, {} values coerced to zero",
            batch.rejected().len(),
            batch.other_years(),
            batch.coerced_values(),
        )?;
        for rejection in batch.rejected() {
            writeln!(out, "  {rejection}")?;
        }
        writeln!(out)?;

        let report = match self.outcome {
            ValidationOutcome::BaselineUnavailable { reason } => {
                return writeln!(out, "Year-over-year validation did not run: {reason}");
            }
            ValidationOutcome::Compared(report) => report,
        };

        writeln!(
            out,
            "Compared with {}: {} facilities, {} counties, state {}",
            report.prior_year,
            report.compared.facilities,
            report.compared.counties,
            if report.compared.state { "yes" } else { "no" },
        )?;
        if report.findings.is_empty() {
            writeln!(out, "No changes beyond their thresholds.")?;
        }

        for level in LEVELS {
            let findings: Vec<&ValidationFinding> = report.findings_at(level).collect();
            if findings.is_empty() {
                continue;
            }
            writeln!(out, "\n{} findings ({}):", capitalized(level), findings.len())?;
            for finding in findings {
                writeln!(out, "  {finding}")?;
            }
        }
        Ok(())
    }
}

fn capitalized(level: EntityLevel) -> &'static str {
    match level {
        EntityLevel::Facility => "Facility",
        EntityLevel::County => "County",
        EntityLevel::State => "State",
    }
}

/// Read a prior-year report. Any failure becomes the reason validation
/// cannot run.
pub(crate) async fn load_baseline(path: &Path) -> Result<AggregateReport, BaselineIssue> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(BaselineIssue::Missing);
        }
        Err(err) => {
            return Err(BaselineIssue::Unreadable {
                detail: format!("{}: {err}", path.display()),
            });
        }
    };

    serde_json::from_str(&text).map_err(|err| BaselineIssue::Unreadable {
        detail: format!("{}: {err}", path.display()),
    })
}

/// Write `value` as pretty JSON.
pub(crate) async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("Failed to encode JSON")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Read a findings list written by `validate`.
pub(crate) async fn load_findings(path: &Path) -> Result<Vec<ValidationFinding>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read findings file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse findings file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use diversion_core::{DiversionService, PipelineConfig, RawFacilityRow, SinkRegistry};

    use super::*;

    fn service(year: i32) -> DiversionService {
        DiversionService::new(PipelineConfig::new(year), Arc::new(SinkRegistry::empty()))
            .expect("valid config")
    }

    #[test]
    fn unavailable_baseline_is_reported_as_not_run() {
        let run = service(2023).validation_run(&[], None);

        let text = render(&run.batch, &run.outcome);

        assert!(text.contains("did not run: No prior-year baseline was supplied"));
    }

    #[test]
    fn rejected_rows_are_listed() {
        let rows = vec![RawFacilityRow {
            calendar_year: "2023".to_owned(),
            status: "Open".to_owned(),
            ..RawFacilityRow::default()
        }];
        let run = service(2023).validation_run(&rows, None);

        let text = render(&run.batch, &run.outcome);

        assert!(text.contains("Rows: 1 rejected"));
    }

    #[tokio::test]
    async fn missing_and_corrupt_baselines_are_distinguished() {
        let dir = tempfile::tempdir().expect("temp dir");
        let corrupt = dir.path().join("baseline.json");
        std::fs::write(&corrupt, "{ not json").expect("write");

        assert_eq!(
            load_baseline(&dir.path().join("absent.json")).await,
            Err(BaselineIssue::Missing)
        );
        assert!(matches!(
            load_baseline(&corrupt).await,
            Err(BaselineIssue::Unreadable { .. })
        ));
    }

    #[tokio::test]
    async fn written_baseline_loads_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("2022.json");
        let report = AggregateReport::empty(2022);

        write_json(&path, &report).await.expect("write");

        assert_eq!(load_baseline(&path).await, Ok(report));
    }

    #[tokio::test]
    async fn written_findings_load_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("findings.json");

        write_json(&path, &Vec::<ValidationFinding>::new())
            .await
            .expect("write");

        assert!(load_findings(&path).await.expect("loads").is_empty());
        assert!(load_findings(&dir.path().join("absent.json")).await.is_err());
    }
}
