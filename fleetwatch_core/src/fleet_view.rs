//! Read projections handed to renderers, tables and notification sinks.
//!
//! Nothing here holds a handle into the reconciler's state: every view is
//! taken at the end of a reconciliation step. The trail is shared read-only;
//! the reconciler copies it on write while older views are still alive.

use fleetwatch_env::VehicleId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::fleet_geofence::GeofenceStatus;
use crate::fleet_record::{ControlCommand, ControlState, Position};

/// Manual override flag as displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideStatus {
    On,
    Off,
}

impl OverrideStatus {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            OverrideStatus::On
        } else {
            OverrideStatus::Off
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OverrideStatus::On => "ON",
            OverrideStatus::Off => "OFF",
        }
    }
}

/// Engine state derived from the last control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Running,
    ShutOff,
}

impl EngineStatus {
    /// `ShutOff` only for an explicit `SHUT_OFF`; restore, unknown or no
    /// command all mean the engine is running.
    pub fn from_control(control: Option<&ControlState>) -> Self {
        match control.map(|c| &c.command) {
            Some(ControlCommand::ShutOff) => EngineStatus::ShutOff,
            _ => EngineStatus::Running,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineStatus::Running => "Running",
            EngineStatus::ShutOff => "Shut Off",
        }
    }
}

/// Everything a renderer needs to draw one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleView {
    pub id: VehicleId,
    pub position: Position,
    pub trail: Arc<Vec<Position>>,
    pub color: String,
    pub distance_m: f64,
    pub status: GeofenceStatus,
    /// Reported speed, 0 when the unit sent none
    pub speed_kmh: f64,
    pub override_status: OverrideStatus,
    pub engine_status: EngineStatus,
}

// ============================================================================
// RECONCILIATION EVENTS
// ============================================================================

/// What happened to a vehicle during one reconciliation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// First valid sighting: draw a marker and start a trail
    Created,
    /// Subsequent sighting: move the marker, extend the trail
    Updated,
    /// Inside -> Outside
    GeofenceExited,
    /// Outside -> Inside
    GeofenceEntered,
    /// Began exceeding the speed limit
    SpeedAlert,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::GeofenceExited => "geofence_exited",
            EventKind::GeofenceEntered => "geofence_entered",
            EventKind::SpeedAlert => "speed_alert",
        }
    }
}

/// An event plus the vehicle's projection after the step that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    pub kind: EventKind,
    pub view: VehicleView,
}

impl ReconciliationEvent {
    pub fn vehicle_id(&self) -> &VehicleId {
        &self.view.id
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

/// Operator-facing message for a transition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub vehicle_id: VehicleId,
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    /// Returns the notification for transition events, `None` for plain
    /// create/update events.
    pub fn from_event(event: &ReconciliationEvent) -> Option<Self> {
        let id = &event.view.id;
        let (severity, message) = match event.kind {
            EventKind::GeofenceExited => (
                Severity::Warning,
                format!("⚠ Vehicle {} has exited the geofence!", id),
            ),
            EventKind::SpeedAlert => (
                Severity::Warning,
                format!("⚠ Vehicle {} is overspeeding! ({} km/h)", id, event.view.speed_kmh),
            ),
            EventKind::GeofenceEntered => (
                Severity::Info,
                format!("Vehicle {} has re-entered the geofence", id),
            ),
            EventKind::Created | EventKind::Updated => return None,
        };

        Some(Self {
            vehicle_id: id.clone(),
            severity,
            message,
        })
    }
}

// ============================================================================
// STATUS TABLE
// ============================================================================

/// One row of the live status table, already formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub id: String,
    pub speed: String,
    pub lat: String,
    pub lng: String,
    pub status: String,
    pub override_status: String,
    pub engine_status: String,
}

impl StatusRow {
    pub fn from_view(view: &VehicleView) -> Self {
        Self {
            id: view.id.to_string(),
            speed: view.speed_kmh.to_string(),
            lat: format!("{:.5}", view.position.lat),
            lng: format!("{:.5}", view.position.lng),
            status: view.status.label().to_string(),
            override_status: format!("Override: {}", view.override_status.label()),
            engine_status: format!("Engine: {}", view.engine_status.label()),
        }
    }

    pub fn cells(&self) -> [&str; 7] {
        [
            self.id.as_str(),
            self.speed.as_str(),
            self.lat.as_str(),
            self.lng.as_str(),
            self.status.as_str(),
            self.override_status.as_str(),
            self.engine_status.as_str(),
        ]
    }
}

impl std::fmt::Display for StatusRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cells().join(" | "))
    }
}
