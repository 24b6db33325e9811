//! Domain data structures for facilities, raw source rows, and material categories.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier of a reporting facility, stable across years.
pub struct FacilityId(pub String);

impl fmt::Display for FacilityId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Operating status of a facility for the reporting year.
pub enum FacilityStatus {
    /// Facility is accepting material.
    Open,
    /// Facility has closed; it stays on the public map but is not validated.
    Closed,
}

impl FacilityStatus {
    /// Parse the free-text status column used by the source systems.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "open" | "active" => Some(Self::Open),
            "closed" | "inactive" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Whether the facility is closed.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// WGS84 point where a facility is located.
pub struct Location {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// Canonical material taxonomy every raw label is renamed onto.
pub enum MaterialCategory {
    /// Paper and paperboard.
    Paper,
    /// Corrugated boxes (OCC).
    Cardboard,
    /// Plastics of any resin.
    Plastic,
    /// Glass containers and cullet.
    Glass,
    /// Ferrous, aluminum, and other non-ferrous metal.
    Metal,
    /// Yard trimmings, food, and other compostable organics.
    Organics,
    /// Wood and pallets.
    Wood,
    /// Textiles and leather.
    Textiles,
    /// Rubber goods other than tires.
    Rubber,
    /// Waste tires.
    Tires,
    /// Electronics and e-waste.
    Electronics,
    /// Lead-acid and lithium-ion batteries.
    Batteries,
    /// Drywall and other construction material.
    Construction,
    /// Mixed or unsorted solid waste stream material.
    Mixed,
}

impl MaterialCategory {
    /// Every category, in display order.
    pub const ALL: [Self; 14] = [
        Self::Paper,
        Self::Cardboard,
        Self::Plastic,
        Self::Glass,
        Self::Metal,
        Self::Organics,
        Self::Wood,
        Self::Textiles,
        Self::Rubber,
        Self::Tires,
        Self::Electronics,
        Self::Batteries,
        Self::Construction,
        Self::Mixed,
    ];

    /// Human-readable category name, also accepted as a raw label.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Paper => "Paper",
            Self::Cardboard => "Cardboard",
            Self::Plastic => "Plastic",
            Self::Glass => "Glass",
            Self::Metal => "Metal",
            Self::Organics => "Organics",
            Self::Wood => "Wood",
            Self::Textiles => "Textiles",
            Self::Rubber => "Rubber",
            Self::Tires => "Tires",
            Self::Electronics => "Electronics",
            Self::Batteries => "Batteries",
            Self::Construction => "Construction",
            Self::Mixed => "Mixed",
        }
    }

    /// Look up a category by its canonical name, ignoring case.
    #[must_use]
    pub fn from_name(label: &str) -> Option<Self> {
        let trimmed = label.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.name().eq_ignore_ascii_case(trimmed))
    }
}

impl fmt::Display for MaterialCategory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Tonnage columns reported per material.
pub enum TonnageField {
    /// Tons sent to recycling.
    Recycled,
    /// Tons sent to composting.
    Composted,
    /// Tons landfilled or otherwise disposed.
    Disposed,
    /// Contaminated share of the recycled tons.
    Contamination,
    /// Tons that originated out of state.
    OutOfState,
}

impl TonnageField {
    /// Parse a field name from a source column header.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "recycled" => Some(Self::Recycled),
            "composted" => Some(Self::Composted),
            "disposed" | "landfilled" => Some(Self::Disposed),
            "contamination" | "contaminated" => Some(Self::Contamination),
            "out_of_state" => Some(Self::OutOfState),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
/// Tonnage reported by one facility for one material category.
pub struct MaterialTonnage {
    /// Tons recycled.
    pub recycled: f64,
    /// Tons composted.
    pub composted: f64,
    /// Tons disposed.
    pub disposed: f64,
    /// Contaminated tons within the recycled tons.
    pub contamination: f64,
    /// Tons received from out of state.
    pub out_of_state: f64,
}

impl MaterialTonnage {
    /// Add `tons` to the given field.
    pub fn add(&mut self, field: TonnageField, tons: f64) {
        let slot = match field {
            TonnageField::Recycled => &mut self.recycled,
            TonnageField::Composted => &mut self.composted,
            TonnageField::Disposed => &mut self.disposed,
            TonnageField::Contamination => &mut self.contamination,
            TonnageField::OutOfState => &mut self.out_of_state,
        };
        *slot += tons;
    }
}

impl AddAssign for MaterialTonnage {
    fn add_assign(&mut self, rhs: Self) {
        self.recycled += rhs.recycled;
        self.composted += rhs.composted;
        self.disposed += rhs.disposed;
        self.contamination += rhs.contamination;
        self.out_of_state += rhs.out_of_state;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One raw `(label, field, value)` cell from the source table.
pub struct RawMaterialEntry {
    /// Material label exactly as the source spelled it.
    pub label: String,
    /// Tonnage field name, e.g. `recycled`.
    pub field: String,
    /// Cell text; `None` when the cell was empty.
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Facility-year row as delivered by a record source, before normalization.
pub struct RawFacilityRow {
    /// Facility identifier, if the source supplied one.
    pub facility_id: Option<String>,
    /// Facility display name.
    pub name: String,
    /// County the facility reports under.
    pub county: String,
    /// Free-text status such as `Open` or `CLOSED`.
    pub status: String,
    /// Latitude text.
    pub latitude: Option<String>,
    /// Longitude text.
    pub longitude: Option<String>,
    /// Calendar year the report covers.
    pub calendar_year: String,
    /// When the source last modified the report.
    pub last_modified: Option<NaiveDateTime>,
    /// Material cells.
    pub materials: Vec<RawMaterialEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Normalized facility report for one calendar year.
pub struct FacilityRecord {
    /// Stable facility identifier.
    pub id: FacilityId,
    /// Calendar year of the report.
    pub year: i32,
    /// Facility display name.
    pub name: String,
    /// County name.
    pub county: String,
    /// Operating status.
    pub status: FacilityStatus,
    /// Facility location when both coordinates parsed.
    pub location: Option<Location>,
    /// Source modification time, used to pick the latest duplicate.
    pub last_modified: Option<NaiveDateTime>,
    /// Zero-based position of the row in the source table.
    pub position: usize,
    /// Tonnage per canonical material category.
    pub materials: BTreeMap<MaterialCategory, MaterialTonnage>,
}

impl FacilityRecord {
    /// Sum of the tonnage across every material category.
    #[must_use]
    pub fn total_tonnage(&self) -> MaterialTonnage {
        let mut total = MaterialTonnage::default();
        for tonnage in self.materials.values() {
            total += *tonnage;
        }
        total
    }
}
