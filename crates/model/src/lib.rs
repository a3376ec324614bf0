use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position in meters, right-handed world coordinates.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Sum of absolute components, used as a scalar speed readout.
    pub fn abs_sum(self) -> f32 {
        self.x.abs() + self.y.abs() + self.z.abs()
    }
}

/// Orientation quaternion, w-first.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Quat {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

/// One tracked point at one instant. Velocity is only reported by backends
/// that expose it (SteamVR does, VRPN does not).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Option<Vec3>,
}

impl Pose {
    pub fn from_position(position: Vec3) -> Self {
        Self { position, ..Self::default() }
    }
}

/// Experiment labels attached to every row of a recording session.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct TrialLabels {
    pub participant: String,
    pub block: u32,
    pub trial: u32,
    pub phase: String,
    pub task: String,
    pub object_name: String,
}

/// Where a persisted table belongs within a session's output.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum DataCategory {
    Trackers,
    SessionLog,
    Other,
}

impl DataCategory {
    pub fn dir_name(self) -> &'static str {
        match self {
            DataCategory::Trackers => "trackers",
            DataCategory::SessionLog => "session_log",
            DataCategory::Other => "other",
        }
    }
}

/// Ordered column names, fixed for the duration of one recording session.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Header(Vec<String>);

impl Header {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Header(columns.into_iter().map(Into::into).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One sampled row: ordered (column, value) cells.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct DataRow(Vec<(String, String)>);

impl DataRow {
    pub fn new() -> Self {
        DataRow(Vec::new())
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn cells(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for DataRow {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        DataRow(iter.into_iter().collect())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("row columns {got:?} do not match table header {expected:?}")]
pub struct RowShapeError {
    pub expected: Vec<String>,
    pub got: Vec<String>,
}

/// A completed table of rows sharing one header. Rows are only accepted when
/// their column names match the header exactly, in order.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DataTable {
    header: Header,
    rows: Vec<DataRow>,
}

impl DataTable {
    pub fn new(header: Header) -> Self {
        Self { header, rows: Vec::new() }
    }

    pub fn add_complete_row(&mut self, row: DataRow) -> Result<(), RowShapeError> {
        let got: Vec<&String> = row.cells().iter().map(|(c, _)| c).collect();
        let expected: Vec<&String> = self.header.columns().iter().collect();
        if got != expected {
            return Err(RowShapeError {
                expected: expected.into_iter().cloned().collect(),
                got: got.into_iter().cloned().collect(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Identity for one recording session, assigned when recording starts.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct SessionId(#[serde(with = "uuid::serde::simple")] pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
