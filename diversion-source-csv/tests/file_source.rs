//! Reading an export from disk through the record source port.

use std::io::Write;

use diversion_core::{DiversionService, PipelineConfig, PortError, RecordSource, SinkRegistry};
use diversion_source_csv::CsvRecordSource;

const EXPORT: &str = "\
facility_id,name,county,status,latitude,longitude,calendar_year,last_modified,Paper|recycled,Comm. Organics|composted,Paper|landfilled
SW0101,Logan Recycling,Cache,Open,41.73,-111.83,2023,2024-01-10 09:00:00,120,40,60
SW0101,Logan Recycling,Cache,Open,41.73,-111.83,2023,2024-02-01T12:00:00Z,150,40,60
SW0102,Hyrum Drop-off,Cache,Closed,,,2023,,5,,
SW0201,Provo Transfer,Utah,Open,40.23,-111.66,2022,,900,,100
";

#[tokio::test]
async fn export_feeds_the_pipeline() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(EXPORT.as_bytes()).expect("write export");
    let source = CsvRecordSource::new(file.path());

    let rows = source.fetch_rows(2023).await.expect("reads export");
    assert_eq!(rows.len(), 4);

    let service = DiversionService::new(
        PipelineConfig::new(2023),
        std::sync::Arc::new(SinkRegistry::empty()),
    )
    .expect("valid config");
    let run = service.publish_run(&rows);

    assert_eq!(run.batch.other_years(), 1);
    assert!(run.batch.rejected().is_empty());
    assert_eq!(run.report.facilities.len(), 2);

    let state = run.report.state.expect("open facility rolled up");
    assert!((state.measures.recycled_tons - 150.0).abs() < 1e-9);
    assert!((state.measures.composted_tons - 40.0).abs() < 1e-9);
    assert!((state.measures.disposed_tons - 60.0).abs() < 1e-9);
}

#[tokio::test]
async fn latin1_thousands_separator_coerces_one_value() {
    let mut export = b"facility_id,name,county,status,latitude,longitude,calendar_year,last_modified,Paper|recycled\n".to_vec();
    export.extend_from_slice(b"SW0101,Logan Recycling,Cache,Open,,,2023,,120\n");
    export.extend_from_slice(b"SW0102,Hyrum Drop-off,Cache,Open,,,2023,,1\xa0200\n");
    export.extend_from_slice(b"SW0103,Nibley Depot,Cache,Open,,,2023,,30\n");
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&export).expect("write export");

    let rows = CsvRecordSource::new(file.path())
        .fetch_rows(2023)
        .await
        .expect("one bad cell does not reject the export");
    assert_eq!(rows.len(), 3);

    let service = DiversionService::new(
        PipelineConfig::new(2023),
        std::sync::Arc::new(SinkRegistry::empty()),
    )
    .expect("valid config");
    let run = service.publish_run(&rows);

    assert_eq!(run.batch.coerced_values(), 1);
    assert_eq!(run.report.facilities.len(), 3);
    let state = run.report.state.expect("state summary");
    assert!((state.measures.recycled_tons - 150.0).abs() < 1e-9);
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = CsvRecordSource::new(dir.path().join("absent.csv"));

    let err = source.fetch_rows(2023).await.expect_err("no such file");

    assert!(matches!(err, PortError::Io(_)));
    assert!(source.describe().ends_with("absent.csv"));
}
