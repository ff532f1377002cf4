//! FleetWatch Core - Vehicle State Reconciliation and Remote Control
//!
//! This library turns a stream of full-fleet snapshots into per-vehicle state:
//! 1. **Snapshot Reconciler**: merges each snapshot into retained state (trails, colours)
//! 2. **Geofence & Alert Evaluator**: haversine containment and speed-limit checks
//! 3. **Command Dispatcher**: shut-off, restore and override writes back to the store
//!
//! Alerts fire on transitions only, so a vehicle parked outside the fence is
//! reported once rather than on every snapshot.

pub mod fleet_config;
pub mod fleet_record;
pub mod fleet_geofence;
pub mod fleet_view;
pub mod fleet_tracking;
pub mod fleet_commands;
pub mod fleet_runtime;

// Re-export key types for convenience
pub use fleet_config::{AdminReference, ConfigError, FleetConfig, DEFAULT_PALETTE};
pub use fleet_record::{ControlCommand, ControlState, Position, RecordError, Snapshot, VehicleRecord};
pub use fleet_geofence::{check_speed, evaluate, haversine_distance_m, GeofenceReading, GeofenceStatus};
pub use fleet_view::{
    EngineStatus, EventKind, Notification, OverrideStatus, ReconciliationEvent, Severity, StatusRow,
    VehicleView,
};
pub use fleet_tracking::{reconcile, FleetState, FleetTracker, ReconcileStats, VehicleState};
pub use fleet_commands::{
    build_override_off, build_override_on, build_restore, build_shut_off, CommandDispatcher,
    CommandPayload, CommandReceipt, DispatchError, VehicleCommand,
};
pub use fleet_runtime::FleetMonitor;
