//! Inbound telemetry: raw store values parsed into typed vehicle records.
//!
//! The store delivers loosely typed JSON written by the vehicle units. A
//! record may be partially populated, and its coordinates may be missing,
//! null or non-numeric. Parsing never panics; a record without usable
//! coordinates comes back as a [`RecordError`] and is skipped by the
//! reconciler for that cycle.

use fleetwatch_env::{SnapshotEnvelope, VehicleId};
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Malformed inbound records
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("Record is not an object")]
    NotAnObject,

    #[error("Missing coordinate: {0}")]
    MissingCoordinate(&'static str),

    #[error("Non-numeric coordinate {field}: {raw}")]
    NonNumericCoordinate { field: &'static str, raw: String },

    #[error("Coordinate {field} out of range: {value}")]
    CoordinateOutOfRange { field: &'static str, value: f64 },
}

// ============================================================================
// POSITION
// ============================================================================

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Returns a position only if both components are finite and in range.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        let finite = LatLng::new(lat, lng).is_ok();
        let in_range = (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng);
        (finite && in_range).then_some(Self { lat, lng })
    }

    /// The H3 cell containing this position.
    ///
    /// Returns `None` for non-finite components.
    pub fn to_cell(&self, resolution: Resolution) -> Option<CellIndex> {
        LatLng::new(self.lat, self.lng)
            .ok()
            .map(|ll| ll.to_cell(resolution))
    }
}

// ============================================================================
// CONTROL STATE
// ============================================================================

/// Remote engine command as stored under `vehicle/{id}/control`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    ShutOff,
    Restore,
    /// Anything else a client wrote; treated as Running
    Unknown(String),
}

impl ControlCommand {
    /// Wire value for the store.
    pub fn as_wire(&self) -> &str {
        match self {
            ControlCommand::ShutOff => "SHUT_OFF",
            ControlCommand::Restore => "RESTORE",
            ControlCommand::Unknown(raw) => raw,
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "SHUT_OFF" => ControlCommand::ShutOff,
            "RESTORE" => ControlCommand::Restore,
            other => ControlCommand::Unknown(other.to_string()),
        }
    }
}

/// The last control command written for a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    pub command: ControlCommand,
    pub timestamp: Option<String>,
}

// ============================================================================
// VEHICLE RECORD
// ============================================================================

/// A validated telemetry record for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub position: Position,

    /// Reported speed in km/h, if the unit sent a usable one
    pub speed_kmh: Option<f64>,

    /// Manual override flag (only a literal `true` enables it)
    pub override_enabled: bool,

    pub control: Option<ControlState>,
}

impl VehicleRecord {
    /// Parse a raw record from the store.
    ///
    /// # Errors
    /// Returns a [`RecordError`] if the value is not an object or if `lat` /
    /// `lng` are absent, null, non-numeric, non-finite or out of range.
    pub fn from_value(raw: &Value) -> Result<Self, RecordError> {
        let fields = raw.as_object().ok_or(RecordError::NotAnObject)?;

        let lat = coordinate(fields.get("lat"), "lat", 90.0)?;
        let lng = coordinate(fields.get("lng"), "lng", 180.0)?;

        let speed_kmh = fields.get("speed").and_then(coerce_f64);
        let override_enabled = matches!(fields.get("override"), Some(Value::Bool(true)));
        let control = fields.get("control").and_then(parse_control);

        Ok(Self {
            position: Position::new(lat, lng),
            speed_kmh,
            override_enabled,
            control,
        })
    }
}

fn coordinate(value: Option<&Value>, field: &'static str, limit: f64) -> Result<f64, RecordError> {
    let value = match value {
        None | Some(Value::Null) => return Err(RecordError::MissingCoordinate(field)),
        Some(v) => v,
    };

    let number = coerce_f64(value).ok_or_else(|| RecordError::NonNumericCoordinate {
        field,
        raw: value.to_string(),
    })?;

    if number.abs() > limit {
        return Err(RecordError::CoordinateOutOfRange { field, value: number });
    }

    Ok(number)
}

/// Coerce a JSON number or numeric string to a finite f64.
fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn parse_control(value: &Value) -> Option<ControlState> {
    let fields = value.as_object()?;
    let command = fields.get("command")?.as_str()?;
    Some(ControlState {
        command: ControlCommand::from_wire(command),
        timestamp: fields
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// The complete `vehicle` collection at one point in time.
///
/// Entries are keyed (and iterated) by vehicle id, so each id appears at
/// most once and encounter order is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: BTreeMap<VehicleId, Value>,
}

impl Snapshot {
    /// An empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from the collection value.
    ///
    /// Accepts an object (id -> record), an array (index -> record, null
    /// slots skipped) or null. Any other JSON kind is treated as empty.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::empty(),
            Value::Object(map) => map
                .into_iter()
                .map(|(id, record)| (VehicleId::from(id), record))
                .collect(),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .filter(|(_, record)| !record.is_null())
                .map(|(index, record)| (VehicleId::from(index.to_string()), record))
                .collect(),
            other => {
                warn!(kind = json_kind(&other), "Ignoring vehicle collection of unexpected shape");
                Self::empty()
            }
        }
    }

    /// Build a snapshot from a store envelope.
    pub fn from_envelope(envelope: &SnapshotEnvelope) -> Self {
        Self::from_value(envelope.value.clone())
    }

    /// Insert or replace the record for `id`.
    pub fn insert(&mut self, id: impl Into<VehicleId>, record: Value) {
        self.records.insert(id.into(), record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VehicleId, &Value)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(VehicleId, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (VehicleId, Value)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
