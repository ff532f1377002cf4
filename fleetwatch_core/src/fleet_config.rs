//! Process-wide configuration: the admin reference point and engine tuning.
//!
//! Configuration is set once at start-up and never mutated afterwards. It can
//! be built in code (`Default` + struct update syntax) or loaded from JSON:
//!
//! ```json
//! {
//!   "reference": {
//!     "centerLat": 11.1556,
//!     "centerLng": 7.6625,
//!     "geofenceRadiusMeters": 10000,
//!     "speedLimitKmh": 50
//!   },
//!   "palette": ["blue", "green", "orange", "purple", "brown"]
//! }
//! ```

use h3o::Resolution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::fleet_record::Position;

/// Trail colours handed out to vehicles in order of first sighting.
pub const DEFAULT_PALETTE: [&str; 5] = ["blue", "green", "orange", "purple", "brown"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid admin reference point ({lat}, {lng})")]
    InvalidCenter { lat: f64, lng: f64 },

    #[error("Geofence radius must be positive and finite, got {0}")]
    InvalidRadius(f64),

    #[error("Speed limit must be non-negative and finite, got {0}")]
    InvalidSpeedLimit(f64),

    #[error("Trail palette must contain at least one colour")]
    EmptyPalette,

    #[error("Invalid H3 resolution: {0}")]
    InvalidResolution(u8),

    #[error("Event buffer must hold at least one event")]
    ZeroEventBuffer,
}

// ============================================================================
// ADMIN REFERENCE
// ============================================================================

/// The fixed geofence centre, radius and speed threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminReference {
    /// Geofence centre latitude (degrees)
    pub center_lat: f64,

    /// Geofence centre longitude (degrees)
    pub center_lng: f64,

    /// Geofence radius in meters
    #[serde(rename = "geofenceRadiusMeters")]
    pub geofence_radius_m: f64,

    /// Speed limit in km/h
    pub speed_limit_kmh: f64,
}

impl Default for AdminReference {
    fn default() -> Self {
        // ABU Zaria, 10 km fence, 50 km/h
        Self {
            center_lat: 11.1556,
            center_lng: 7.6625,
            geofence_radius_m: 10_000.0,
            speed_limit_kmh: 50.0,
        }
    }
}

impl AdminReference {
    /// Create a reference point.
    pub fn new(center_lat: f64, center_lng: f64, geofence_radius_m: f64, speed_limit_kmh: f64) -> Self {
        Self {
            center_lat,
            center_lng,
            geofence_radius_m,
            speed_limit_kmh,
        }
    }

    /// Replace the radius with one given in kilometers.
    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.geofence_radius_m = radius_km * 1000.0;
        self
    }

    /// The geofence centre as a position.
    pub fn center(&self) -> Position {
        Position::new(self.center_lat, self.center_lng)
    }

    /// Check that the reference describes a usable fence.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Position::checked(self.center_lat, self.center_lng).is_none() {
            return Err(ConfigError::InvalidCenter {
                lat: self.center_lat,
                lng: self.center_lng,
            });
        }
        if !self.geofence_radius_m.is_finite() || self.geofence_radius_m <= 0.0 {
            return Err(ConfigError::InvalidRadius(self.geofence_radius_m));
        }
        if !self.speed_limit_kmh.is_finite() || self.speed_limit_kmh < 0.0 {
            return Err(ConfigError::InvalidSpeedLimit(self.speed_limit_kmh));
        }
        Ok(())
    }
}

// ============================================================================
// FLEET CONFIG
// ============================================================================

/// Configuration for the reconciler and monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FleetConfig {
    /// Geofence and speed-limit reference
    pub reference: AdminReference,

    /// Trail colours, assigned round-robin by arrival order
    pub palette: Vec<String>,

    /// H3 resolution for the vehicle spatial index (default: 7, ~1.2km edges)
    pub h3_resolution: u8,

    /// Capacity of the monitor's event channel
    pub event_buffer: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            reference: AdminReference::default(),
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            h3_resolution: 7,
            event_buffer: 1024,
        }
    }
}

impl FleetConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// The configured H3 resolution.
    pub fn resolution(&self) -> Result<Resolution, ConfigError> {
        Resolution::try_from(self.h3_resolution)
            .map_err(|_| ConfigError::InvalidResolution(self.h3_resolution))
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reference.validate()?;
        if self.palette.is_empty() {
            return Err(ConfigError::EmptyPalette);
        }
        self.resolution()?;
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroEventBuffer);
        }
        Ok(())
    }
}
