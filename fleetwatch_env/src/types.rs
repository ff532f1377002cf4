//! Common types for the FleetWatch environment abstraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the store collection holding one child per vehicle.
pub const VEHICLE_COLLECTION: &str = "vehicle";

/// Characters the store refuses inside a single path segment.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// Identifier of a tracked vehicle.
///
/// This is the child key under the `vehicle` collection, kept verbatim
/// (e.g. `"1"`, `"veh1"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    /// Creates a VehicleId from any string-like key.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id can be used as a single store path segment.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty() && !self.0.contains(&FORBIDDEN_KEY_CHARS[..])
    }

    /// Builds `vehicle/{id}/{child}`.
    pub fn child_path(&self, child: &str) -> String {
        format!("{}/{}/{}", VEHICLE_COLLECTION, self.0, child)
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for VehicleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single write against the store: set `value` at `path`.
///
/// `path` is relative to the store root, e.g. `vehicle/veh1/override`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreWrite {
    pub path: String,
    pub value: Value,
}

impl StoreWrite {
    /// Creates a new write.
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// Returns the path split into segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

/// Envelope for one full-collection snapshot pushed by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    /// Monotonic delivery counter assigned by the store client
    pub sequence: u64,

    /// The entire `vehicle` collection (`Value::Null` when empty)
    pub value: Value,

    /// Time the snapshot was received (client clock, milliseconds)
    pub received_ms: u64,
}

impl SnapshotEnvelope {
    /// Creates a new envelope.
    pub fn new(sequence: u64, value: Value, received_ms: u64) -> Self {
        Self {
            sequence,
            value,
            received_ms,
        }
    }

    /// Returns true if the store reported no vehicles at all.
    pub fn is_empty(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.iter().all(Value::is_null),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_path() {
        let id = VehicleId::from("veh1");
        assert_eq!(id.child_path("control"), "vehicle/veh1/control");
    }

    #[test]
    fn test_path_safety() {
        assert!(VehicleId::from("veh1").is_path_safe());
        assert!(!VehicleId::from("").is_path_safe());
        assert!(!VehicleId::from("a/b").is_path_safe());
        assert!(!VehicleId::from("a.b").is_path_safe());
        assert!(!VehicleId::from("x[0]").is_path_safe());
    }

    #[test]
    fn test_envelope_emptiness() {
        assert!(SnapshotEnvelope::new(0, Value::Null, 0).is_empty());
        assert!(SnapshotEnvelope::new(0, json!({}), 0).is_empty());
        assert!(SnapshotEnvelope::new(0, json!([null, null]), 0).is_empty());
        assert!(!SnapshotEnvelope::new(0, json!({"1": {"lat": 1.0}}), 0).is_empty());
    }

    #[test]
    fn test_write_segments() {
        let write = StoreWrite::new("vehicle/veh1/override", Value::Bool(true));
        let segments: Vec<&str> = write.segments().collect();
        assert_eq!(segments, vec!["vehicle", "veh1", "override"]);
    }
}
