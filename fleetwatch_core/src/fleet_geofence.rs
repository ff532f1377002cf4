//! The "GEOFENCE" Engine - containment and speed-limit evaluation
//!
//! Pure functions over a fixed [`AdminReference`]:
//! - Great-circle (haversine) distance on a spherical Earth
//! - Circular geofence containment around the admin point
//! - Speed-limit check against the reported speed

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::fleet_config::AdminReference;
use crate::fleet_record::{Position, VehicleRecord};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Containment of a vehicle relative to the geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeofenceStatus {
    Inside,
    Outside,
}

impl GeofenceStatus {
    /// Table label (outside is flagged with a warning sign).
    pub fn label(&self) -> &'static str {
        match self {
            GeofenceStatus::Inside => "Inside",
            GeofenceStatus::Outside => "⚠ Outside",
        }
    }
}

impl std::fmt::Display for GeofenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeofenceStatus::Inside => write!(f, "Inside"),
            GeofenceStatus::Outside => write!(f, "Outside"),
        }
    }
}

/// Result of evaluating one position against the fence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceReading {
    pub distance_m: f64,
    pub status: GeofenceStatus,
}

#[inline]
fn to_radians(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

/// Great-circle distance between two positions in meters.
///
/// ```text
/// a = sin²(Δφ/2) + cos φ1 · cos φ2 · sin²(Δλ/2)
/// d = 2R · atan2(√a, √(1−a))
/// ```
pub fn haversine_distance_m(a: Position, b: Position) -> f64 {
    let phi1 = to_radians(a.lat);
    let phi2 = to_radians(b.lat);
    let d_phi = to_radians(b.lat - a.lat);
    let d_lambda = to_radians(b.lng - a.lng);

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Evaluate containment of `position`.
///
/// The boundary belongs to the fence: `Outside` only when the distance is
/// strictly greater than the radius.
pub fn evaluate(position: Position, reference: &AdminReference) -> GeofenceReading {
    let distance_m = haversine_distance_m(position, reference.center());
    let status = if distance_m > reference.geofence_radius_m {
        GeofenceStatus::Outside
    } else {
        GeofenceStatus::Inside
    };

    GeofenceReading { distance_m, status }
}

/// True if the record reports a speed strictly above the limit.
pub fn check_speed(record: &VehicleRecord, reference: &AdminReference) -> bool {
    record
        .speed_kmh
        .map_or(false, |speed| speed > reference.speed_limit_kmh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn zaria() -> AdminReference {
        AdminReference::new(11.1533, 7.6544, 10_000.0, 50.0)
    }

    fn record(speed_kmh: Option<f64>) -> VehicleRecord {
        VehicleRecord {
            position: Position::new(11.1533, 7.6544),
            speed_kmh,
            override_enabled: false,
            control: None,
        }
    }

    #[test]
    fn test_distance_zero_for_identical_points() {
        let p = Position::new(11.1533, 7.6544);
        assert_eq!(haversine_distance_m(p, p), 0.0);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Position::new(11.1533, 7.6544);
        let b = Position::new(11.30, 7.80);
        assert_relative_eq!(
            haversine_distance_m(a, b),
            haversine_distance_m(b, a),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // 2πR / 360
        let d = haversine_distance_m(Position::new(0.0, 0.0), Position::new(1.0, 0.0));
        assert_relative_eq!(d, 111_194.93, epsilon = 0.5);
    }

    #[test]
    fn test_antipodal_points() {
        let d = haversine_distance_m(Position::new(0.0, 0.0), Position::new(0.0, 180.0));
        assert_relative_eq!(d, PI * EARTH_RADIUS_M, epsilon = 1e-3);
    }

    #[test]
    fn test_center_is_inside() {
        let reading = evaluate(Position::new(11.1533, 7.6544), &zaria());
        assert!(reading.distance_m.abs() < 1e-6);
        assert_eq!(reading.status, GeofenceStatus::Inside);
    }

    #[test]
    fn test_far_point_is_outside() {
        let reading = evaluate(Position::new(11.30, 7.80), &zaria());
        assert!(reading.distance_m > 10_000.0);
        assert_eq!(reading.status, GeofenceStatus::Outside);
    }

    #[test]
    fn test_boundary_is_inside() {
        let reference = zaria();
        let edge = Position::new(11.2333, 7.6544);
        let distance = haversine_distance_m(edge, reference.center());

        let on_boundary = AdminReference {
            geofence_radius_m: distance,
            ..reference
        };
        assert_eq!(evaluate(edge, &on_boundary).status, GeofenceStatus::Inside);

        let just_inside_radius = AdminReference {
            geofence_radius_m: distance - 1e-6,
            ..reference
        };
        assert_eq!(evaluate(edge, &just_inside_radius).status, GeofenceStatus::Outside);
    }

    #[test]
    fn test_speed_limit_strict() {
        let reference = zaria();
        assert!(!check_speed(&record(None), &reference));
        assert!(!check_speed(&record(Some(40.0)), &reference));
        assert!(!check_speed(&record(Some(50.0)), &reference));
        assert!(check_speed(&record(Some(50.1)), &reference));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(GeofenceStatus::Inside.label(), "Inside");
        assert_eq!(GeofenceStatus::Outside.label(), "⚠ Outside");
        assert_eq!(GeofenceStatus::Outside.to_string(), "Outside");
    }
}
