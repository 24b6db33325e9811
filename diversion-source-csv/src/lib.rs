//! Record source reading the facility report export as a wide CSV table.
//!
//! Every row holds one facility report. The fixed columns come first in any
//! order; each remaining column whose header reads `<label>|<field>` carries
//! the tons of one material label for one tonnage field.

use std::io::Read;
use std::path::PathBuf;
use std::str;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use csv::ByteRecord;
use tracing::{debug, info, warn};

use diversion_core::{
    model::{RawFacilityRow, RawMaterialEntry},
    ports::{PortError, RecordSource},
};

/// Separator between the material label and the tonnage field in a header.
pub const MATERIAL_SEPARATOR: char = '|';

const FACILITY_ID: &str = "facility_id";
const NAME: &str = "name";
const COUNTY: &str = "county";
const STATUS: &str = "status";
const LATITUDE: &str = "latitude";
const LONGITUDE: &str = "longitude";
const CALENDAR_YEAR: &str = "calendar_year";
const LAST_MODIFIED: &str = "last_modified";

/// Record source backed by a CSV file on disk.
pub struct CsvRecordSource {
    path: PathBuf,
}

impl CsvRecordSource {
    /// Create a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RecordSource for CsvRecordSource {
    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    async fn fetch_rows(&self, year: i32) -> Result<Vec<RawFacilityRow>, PortError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let rows = parse_rows(bytes.as_slice())?;
        info!(
            path = %self.path.display(),
            year,
            rows = rows.len(),
            "read facility report export"
        );
        Ok(rows)
    }
}

/// Where each fixed column sits in the header.
struct Layout {
    facility_id: usize,
    name: usize,
    county: usize,
    status: usize,
    latitude: usize,
    longitude: usize,
    calendar_year: usize,
    last_modified: usize,
    materials: Vec<MaterialColumn>,
}

struct MaterialColumn {
    index: usize,
    label: String,
    field: String,
}

impl Layout {
    fn from_headers(headers: &[String]) -> Result<Self, PortError> {
        let position = |column: &str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(column))
                .ok_or_else(|| PortError::MalformedSource(format!("missing column `{column}`")))
        };

        let materials = headers
            .iter()
            .enumerate()
            .filter_map(|(index, header)| {
                let (label, field) = header.split_once(MATERIAL_SEPARATOR)?;
                Some(MaterialColumn {
                    index,
                    label: label.trim().to_owned(),
                    field: field.trim().to_owned(),
                })
            })
            .collect();

        Ok(Self {
            facility_id: position(FACILITY_ID)?,
            name: position(NAME)?,
            county: position(COUNTY)?,
            status: position(STATUS)?,
            latitude: position(LATITUDE)?,
            longitude: position(LONGITUDE)?,
            calendar_year: position(CALENDAR_YEAR)?,
            last_modified: position(LAST_MODIFIED)?,
            materials,
        })
    }

    fn row(&self, record: &ByteRecord) -> RawFacilityRow {
        let cell = |index: usize| {
            record
                .get(index)
                .map(String::from_utf8_lossy)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        RawFacilityRow {
            facility_id: cell(self.facility_id),
            name: cell(self.name).unwrap_or_default(),
            county: cell(self.county).unwrap_or_default(),
            status: cell(self.status).unwrap_or_default(),
            latitude: cell(self.latitude),
            longitude: cell(self.longitude),
            calendar_year: cell(self.calendar_year).unwrap_or_default(),
            last_modified: cell(self.last_modified).as_deref().and_then(parse_timestamp),
            materials: self
                .materials
                .iter()
                .map(|column| RawMaterialEntry {
                    label: column.label.clone(),
                    field: column.field.clone(),
                    value: cell(column.index),
                })
                .collect(),
        }
    }
}

/// Parse a whole export.
///
/// Cells that are not valid UTF-8 are decoded lossily, so a stray byte only
/// spoils its own cell. A tonnage cell spoiled that way counts as coerced.
///
/// # Errors
///
/// Returns [`PortError::MalformedSource`] when a fixed column is missing or
/// the CSV itself cannot be read.
pub fn parse_rows<R: Read>(input: R) -> Result<Vec<RawFacilityRow>, PortError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);

    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(malformed)?
        .iter()
        .map(|header| String::from_utf8_lossy(header).into_owned())
        .collect();
    let layout = Layout::from_headers(&headers)?;
    debug!(
        columns = headers.len(),
        material_columns = layout.materials.len(),
        "resolved export layout"
    );

    reader
        .byte_records()
        .map(|record| {
            let record = record.map_err(malformed)?;
            if record.iter().any(|cell| str::from_utf8(cell).is_err()) {
                warn!(
                    line = record.position().map(csv::Position::line),
                    "row has cells that are not valid UTF-8"
                );
            }
            Ok(layout.row(&record))
        })
        .collect()
}

/// Parse a `last_modified` cell. Accepts RFC 3339 (converted to UTC) or
/// `YYYY-MM-DD HH:MM:SS`; anything else counts as no timestamp.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|stamp| stamp.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

fn malformed(err: csv::Error) -> PortError {
    PortError::MalformedSource(err.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const HEADER: &str = "facility_id,name,county,status,latitude,longitude,calendar_year,last_modified";

    #[test]
    fn reads_fixed_and_material_columns() {
        let input = format!(
            "{HEADER},Comm. Organics|composted,Paper|recycled,region\n\
             SW0101,Logan Compost,Cache,Open,41.73,-111.83,2023,2024-02-01 08:30:00,\"1,200\",,North\n"
        );

        let rows = parse_rows(input.as_bytes()).expect("parses");

        let [row] = rows.as_slice() else {
            panic!("expected one row, got {rows:?}");
        };
        assert_eq!(row.facility_id.as_deref(), Some("SW0101"));
        assert_eq!(row.county, "Cache");
        assert_eq!(row.calendar_year, "2023");
        assert_eq!(
            row.last_modified,
            NaiveDate::from_ymd_opt(2024, 2, 1).and_then(|day| day.and_hms_opt(8, 30, 0))
        );
        assert_eq!(
            row.materials,
            vec![
                RawMaterialEntry {
                    label: "Comm. Organics".to_owned(),
                    field: "composted".to_owned(),
                    value: Some("1,200".to_owned()),
                },
                RawMaterialEntry {
                    label: "Paper".to_owned(),
                    field: "recycled".to_owned(),
                    value: None,
                },
            ]
        );
    }

    #[test]
    fn missing_fixed_column_is_malformed() {
        let input = "facility_id,name,county,status,latitude,longitude,calendar_year\nSW1,a,b,Open,,,2023\n";

        let err = parse_rows(input.as_bytes()).expect_err("last_modified missing");

        assert!(matches!(err, PortError::MalformedSource(message) if message.contains("last_modified")));
    }

    #[test]
    fn empty_cells_become_none() {
        let input = format!("{HEADER}\n,Unnamed,Kane,Open,,,2023,\n");

        let rows = parse_rows(input.as_bytes()).expect("parses");

        let row = rows.first().expect("one row");
        assert_eq!(row.facility_id, None);
        assert_eq!(row.latitude, None);
        assert_eq!(row.last_modified, None);
    }

    #[test]
    fn invalid_utf8_cell_spoils_only_its_own_value() {
        let mut input = format!("{HEADER},Paper|recycled\n").into_bytes();
        input.extend_from_slice(b"SW0101,Logan,Cache,Open,,,2023,,120\n");
        input.extend_from_slice(b"SW0102,Hyrum,Cache,Open,,,2023,,1\xa0200\n");
        input.extend_from_slice(b"SW0103,Nibley,Cache,Open,,,2023,,30\n");

        let rows = parse_rows(input.as_slice()).expect("parses");

        let values: Vec<Option<&str>> = rows
            .iter()
            .flat_map(|row| row.materials.iter().map(|entry| entry.value.as_deref()))
            .collect();
        assert_eq!(values, vec![Some("120"), Some("1\u{fffd}200"), Some("30")]);
        assert_eq!(rows.get(1).and_then(|row| row.facility_id.as_deref()), Some("SW0102"));
    }

    #[test]
    fn timestamps_accept_rfc3339_and_plain_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).and_then(|day| day.and_hms_opt(17, 0, 0));

        assert_eq!(parse_timestamp("2024-03-05T10:00:00-07:00"), expected);
        assert_eq!(parse_timestamp("2024-03-05 17:00:00"), expected);
        assert_eq!(parse_timestamp("March 5th"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
