//! The "TRACKING" Engine - Snapshot Reconciliation Layer
//!
//! Merges full-collection snapshots from the store into retained
//! per-vehicle state:
//! 1. Record validation (malformed records are skipped for the cycle)
//! 2. Create-or-update (one state per id, append-only trail)
//! 3. Geofence & speed evaluation
//! 4. Transition detection (alerts fire on status *changes* only)
//!
//! The whole collection is owned by a single [`FleetState`] which is passed
//! explicitly through [`reconcile`]; renderers only ever see
//! [`VehicleView`] projections.

use fleetwatch_env::VehicleId;
use h3o::{CellIndex, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::fleet_config::{AdminReference, ConfigError, FleetConfig, DEFAULT_PALETTE};
use crate::fleet_geofence::{check_speed, evaluate, GeofenceReading, GeofenceStatus};
use crate::fleet_record::{Position, Snapshot, VehicleRecord};
use crate::fleet_view::{
    EngineStatus, EventKind, OverrideStatus, ReconciliationEvent, StatusRow, VehicleView,
};

/// Largest ring count honoured by `vehicles_near`; larger values are clamped.
pub const MAX_NEARBY_RINGS: u32 = 64;

// ============================================================================
// VEHICLE STATE
// ============================================================================

/// Retained state for one vehicle.
///
/// Created on the first snapshot that carries the id with valid
/// coordinates, updated on every later one, never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleState {
    pub id: VehicleId,

    pub last_position: Position,

    /// Every accepted position in arrival order, shared with the views of
    /// the latest step
    trail: Arc<Vec<Position>>,

    /// Assigned at creation, never recomputed
    pub color: String,

    pub last_status: GeofenceStatus,

    /// Whether the vehicle was over the limit on its last sighting
    pub last_speed_alerted: bool,

    pub last_distance_m: f64,

    pub last_speed_kmh: Option<f64>,

    pub override_status: OverrideStatus,

    pub engine_status: EngineStatus,

    /// Current H3 cell for spatial lookup
    pub h3_cell: Option<CellIndex>,

    /// Number of accepted sightings (equals trail length)
    pub updates: u64,
}

impl VehicleState {
    /// Fresh state with the transition baseline: inside, not speeding.
    fn new(id: VehicleId, position: Position, color: String, h3_cell: Option<CellIndex>) -> Self {
        Self {
            id,
            last_position: position,
            trail: Arc::new(vec![position]),
            color,
            last_status: GeofenceStatus::Inside,
            last_speed_alerted: false,
            last_distance_m: 0.0,
            last_speed_kmh: None,
            override_status: OverrideStatus::Off,
            engine_status: EngineStatus::Running,
            h3_cell,
            updates: 1,
        }
    }

    /// The accumulated trail, oldest first.
    pub fn trail(&self) -> &[Position] {
        &self.trail
    }

    fn advance(&mut self, position: Position, h3_cell: Option<CellIndex>) {
        self.last_position = position;
        Arc::make_mut(&mut self.trail).push(position);
        self.h3_cell = h3_cell;
        self.updates += 1;
    }

    /// Store the new containment reading, returning the transition if any.
    fn observe_geofence(&mut self, reading: GeofenceReading) -> Option<EventKind> {
        let transition = match (self.last_status, reading.status) {
            (GeofenceStatus::Inside, GeofenceStatus::Outside) => Some(EventKind::GeofenceExited),
            (GeofenceStatus::Outside, GeofenceStatus::Inside) => Some(EventKind::GeofenceEntered),
            _ => None,
        };
        self.last_status = reading.status;
        self.last_distance_m = reading.distance_m;
        transition
    }

    /// Store the new speed reading, returning true when the vehicle just
    /// crossed above the limit.
    fn observe_speed(&mut self, speed_kmh: Option<f64>, over_limit: bool) -> bool {
        let alert = over_limit && !self.last_speed_alerted;
        self.last_speed_alerted = over_limit;
        self.last_speed_kmh = speed_kmh;
        alert
    }

    fn observe_control(&mut self, record: &VehicleRecord) {
        self.override_status = OverrideStatus::from_flag(record.override_enabled);
        self.engine_status = EngineStatus::from_control(record.control.as_ref());
    }

    /// Owned projection for renderers.
    pub fn view(&self) -> VehicleView {
        VehicleView {
            id: self.id.clone(),
            position: self.last_position,
            trail: Arc::clone(&self.trail),
            color: self.color.clone(),
            distance_m: self.last_distance_m,
            status: self.last_status,
            speed_kmh: self.last_speed_kmh.unwrap_or(0.0),
            override_status: self.override_status,
            engine_status: self.engine_status,
        }
    }
}

// ============================================================================
// RECONCILE STATISTICS
// ============================================================================

/// Counters gathered while reconciling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub snapshots: u64,
    pub empty_snapshots: u64,
    pub records_applied: u64,
    pub records_skipped: u64,
    pub vehicles_created: u64,
    pub geofence_exits: u64,
    pub geofence_entries: u64,
    pub speed_alerts: u64,
}

impl ReconcileStats {
    fn count(&mut self, kind: EventKind) {
        match kind {
            EventKind::Created => self.vehicles_created += 1,
            EventKind::Updated => {}
            EventKind::GeofenceExited => self.geofence_exits += 1,
            EventKind::GeofenceEntered => self.geofence_entries += 1,
            EventKind::SpeedAlert => self.speed_alerts += 1,
        }
    }
}

// ============================================================================
// FLEET STATE (The owned collection)
// ============================================================================

/// All vehicles seen so far, keyed by id.
#[derive(Debug, Clone)]
pub struct FleetState {
    vehicles: BTreeMap<VehicleId, VehicleState>,

    /// Maps H3 cells to the vehicles currently in that cell
    spatial_index: HashMap<CellIndex, BTreeSet<VehicleId>>,

    /// Vehicles created so far; drives colour assignment
    arrivals: usize,

    palette: Vec<String>,

    resolution: Resolution,
}

impl Default for FleetState {
    fn default() -> Self {
        Self::with_palette(
            DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            Resolution::Seven,
        )
    }
}

impl FleetState {
    /// Create an empty collection. The palette must hold at least one colour.
    pub fn new(palette: Vec<String>, resolution: Resolution) -> Result<Self, ConfigError> {
        if palette.is_empty() {
            return Err(ConfigError::EmptyPalette);
        }
        Ok(Self::with_palette(palette, resolution))
    }

    pub fn from_config(config: &FleetConfig) -> Result<Self, ConfigError> {
        Self::new(config.palette.clone(), config.resolution()?)
    }

    fn with_palette(palette: Vec<String>, resolution: Resolution) -> Self {
        Self {
            vehicles: BTreeMap::new(),
            spatial_index: HashMap::new(),
            arrivals: 0,
            palette,
            resolution,
        }
    }

    pub fn get(&self, id: &VehicleId) -> Option<&VehicleState> {
        self.vehicles.get(id)
    }

    pub fn contains(&self, id: &VehicleId) -> bool {
        self.vehicles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Vehicles in id order.
    pub fn iter(&self) -> impl Iterator<Item = &VehicleState> {
        self.vehicles.values()
    }

    /// Vehicles whose last position lies in the H3 cell of `position` or
    /// within `k` rings of it, in id order.
    ///
    /// `k` is clamped to [`MAX_NEARBY_RINGS`].
    pub fn vehicles_near(&self, position: Position, k: u32) -> Vec<&VehicleState> {
        let Some(cell) = position.to_cell(self.resolution) else {
            return Vec::new();
        };

        let mut ids = BTreeSet::new();
        for neighbor in cell.grid_disk_safe(k.min(MAX_NEARBY_RINGS)) {
            if let Some(found) = self.spatial_index.get(&neighbor) {
                ids.extend(found.iter());
            }
        }

        ids.into_iter()
            .filter_map(|id| self.vehicles.get(id))
            .collect()
    }

    /// Apply one valid record, appending the resulting events.
    fn apply_record(
        &mut self,
        id: &VehicleId,
        record: &VehicleRecord,
        reference: &AdminReference,
        events: &mut Vec<ReconciliationEvent>,
    ) {
        let cell = record.position.to_cell(self.resolution);
        let reading = evaluate(record.position, reference);
        let over_limit = check_speed(record, reference);

        let (vehicle, kind, previous_cell) = match self.vehicles.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let vehicle = entry.into_mut();
                let previous_cell = vehicle.h3_cell;
                vehicle.advance(record.position, cell);
                (vehicle, EventKind::Updated, previous_cell)
            }
            Entry::Vacant(entry) => {
                let color = self.palette[self.arrivals % self.palette.len()].clone();
                self.arrivals += 1;
                let vehicle = entry.insert(VehicleState::new(id.clone(), record.position, color, cell));
                (vehicle, EventKind::Created, None)
            }
        };

        let geofence = vehicle.observe_geofence(reading);
        let speeding = vehicle.observe_speed(record.speed_kmh, over_limit);
        vehicle.observe_control(record);
        let view = vehicle.view();

        if previous_cell != cell {
            index_move(&mut self.spatial_index, id, previous_cell, cell);
        }

        let mut push = |kind: EventKind| {
            events.push(ReconciliationEvent {
                kind,
                view: view.clone(),
            })
        };
        push(kind);
        if let Some(transition) = geofence {
            push(transition);
        }
        if speeding {
            push(EventKind::SpeedAlert);
        }
    }
}

fn index_move(
    index: &mut HashMap<CellIndex, BTreeSet<VehicleId>>,
    id: &VehicleId,
    from: Option<CellIndex>,
    to: Option<CellIndex>,
) {
    if let Some(old) = from {
        if let Some(set) = index.get_mut(&old) {
            set.remove(id);
            // Clean up empty cells
            if set.is_empty() {
                index.remove(&old);
            }
        }
    }
    if let Some(new) = to {
        index.entry(new).or_default().insert(id.clone());
    }
}

// ============================================================================
// RECONCILIATION
// ============================================================================

/// Merge `snapshot` into `previous`, returning the next state and the
/// events in encounter order.
///
/// Vehicles absent from the snapshot are carried over untouched. A null or
/// empty snapshot is a no-op.
pub fn reconcile(
    previous: FleetState,
    snapshot: &Snapshot,
    reference: &AdminReference,
) -> (FleetState, Vec<ReconciliationEvent>) {
    let mut state = previous;
    let mut stats = ReconcileStats::default();
    let events = reconcile_in_place(&mut state, snapshot, reference, &mut stats);
    (state, events)
}

fn reconcile_in_place(
    state: &mut FleetState,
    snapshot: &Snapshot,
    reference: &AdminReference,
    stats: &mut ReconcileStats,
) -> Vec<ReconciliationEvent> {
    stats.snapshots += 1;
    let mut events = Vec::new();

    if snapshot.is_empty() {
        debug!("Empty vehicle snapshot; keeping prior state");
        stats.empty_snapshots += 1;
        return events;
    }

    for (id, raw) in snapshot.iter() {
        let record = match VehicleRecord::from_value(raw) {
            Ok(record) => record,
            Err(err) => {
                debug!(vehicle = %id, error = %err, "Skipping malformed vehicle record");
                stats.records_skipped += 1;
                continue;
            }
        };

        let first_new = events.len();
        state.apply_record(id, &record, reference, &mut events);
        stats.records_applied += 1;
        for event in &events[first_new..] {
            stats.count(event.kind);
        }
    }

    events
}

// ============================================================================
// FLEET TRACKER (Stateful wrapper)
// ============================================================================

/// Owns a [`FleetState`] and the reference it is evaluated against.
pub struct FleetTracker {
    state: FleetState,
    reference: AdminReference,
    stats: ReconcileStats,
}

impl FleetTracker {
    pub fn new(reference: AdminReference, state: FleetState) -> Self {
        Self {
            state,
            reference,
            stats: ReconcileStats::default(),
        }
    }

    /// Tracker with default palette and resolution.
    pub fn with_reference(reference: AdminReference) -> Self {
        Self::new(reference, FleetState::default())
    }

    pub fn from_config(config: &FleetConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.reference, FleetState::from_config(config)?))
    }

    /// Reconcile one snapshot into the retained state.
    pub fn apply(&mut self, snapshot: &Snapshot) -> Vec<ReconciliationEvent> {
        reconcile_in_place(&mut self.state, snapshot, &self.reference, &mut self.stats)
    }

    pub fn state(&self) -> &FleetState {
        &self.state
    }

    pub fn reference(&self) -> &AdminReference {
        &self.reference
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    pub fn view(&self, id: &VehicleId) -> Option<VehicleView> {
        self.state.get(id).map(VehicleState::view)
    }

    pub fn views(&self) -> Vec<VehicleView> {
        self.state.iter().map(VehicleState::view).collect()
    }

    /// Rows for the status table, in id order.
    pub fn status_rows(&self) -> Vec<StatusRow> {
        self.state
            .iter()
            .map(|vehicle| StatusRow::from_view(&vehicle.view()))
            .collect()
    }

    pub fn vehicles_near(&self, position: Position, k: u32) -> Vec<&VehicleState> {
        self.state.vehicles_near(position, k)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn reference() -> AdminReference {
        AdminReference::new(11.1533, 7.6544, 10_000.0, 50.0)
    }

    fn snapshot(value: Value) -> Snapshot {
        Snapshot::from_value(value)
    }

    fn kinds(events: &[ReconciliationEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    fn id(raw: &str) -> VehicleId {
        VehicleId::from(raw)
    }

    #[test]
    fn test_end_to_end_exit() {
        let mut tracker = FleetTracker::with_reference(reference());

        let events = tracker.apply(&snapshot(json!({
            "veh1": { "lat": 11.1533, "lng": 7.6544, "speed": 40 }
        })));
        assert_eq!(kinds(&events), vec![EventKind::Created]);
        let view = &events[0].view;
        assert!(view.distance_m < 1e-6);
        assert_eq!(view.status, GeofenceStatus::Inside);
        assert_eq!(view.speed_kmh, 40.0);

        let events = tracker.apply(&snapshot(json!({
            "veh1": { "lat": 11.30, "lng": 7.80 }
        })));
        assert_eq!(kinds(&events), vec![EventKind::Updated, EventKind::GeofenceExited]);
        let view = &events[1].view;
        assert!(view.distance_m > 10_000.0);
        assert_eq!(view.status, GeofenceStatus::Outside);
        assert_eq!(view.trail.len(), 2);
        assert_eq!(tracker.stats().geofence_exits, 1);
    }

    #[test]
    fn test_idempotent_redelivery() {
        let mut tracker = FleetTracker::with_reference(reference());
        let parked = snapshot(json!({ "veh1": { "lat": 11.30, "lng": 7.80 } }));

        let first = tracker.apply(&parked);
        assert_eq!(kinds(&first), vec![EventKind::Created, EventKind::GeofenceExited]);

        let second = tracker.apply(&parked);
        assert_eq!(kinds(&second), vec![EventKind::Updated]);
        assert_eq!(second[0].view.status, GeofenceStatus::Outside);

        // No de-duplication of identical points
        let vehicle = tracker.state().get(&id("veh1")).unwrap();
        assert_eq!(vehicle.trail().len(), 2);
        assert_eq!(vehicle.trail()[0], vehicle.trail()[1]);
    }

    #[test]
    fn test_transition_only_alerting() {
        let mut tracker = FleetTracker::with_reference(reference());
        let inside = snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544 } }));
        let outside = snapshot(json!({ "v": { "lat": 11.30, "lng": 7.80 } }));

        let mut all = Vec::new();
        all.extend(tracker.apply(&inside));
        all.extend(tracker.apply(&outside));
        for _ in 0..5 {
            all.extend(tracker.apply(&outside));
        }
        all.extend(tracker.apply(&inside));

        let exits = all.iter().filter(|e| e.kind == EventKind::GeofenceExited).count();
        let entries = all.iter().filter(|e| e.kind == EventKind::GeofenceEntered).count();
        assert_eq!(exits, 1);
        assert_eq!(entries, 1);
        assert_eq!(tracker.state().get(&id("v")).unwrap().trail().len(), 8);
    }

    #[test]
    fn test_first_sighting_outside_fires_exit() {
        let (state, events) = reconcile(
            FleetState::default(),
            &snapshot(json!({ "v": { "lat": 11.30, "lng": 7.80 } })),
            &reference(),
        );
        assert_eq!(kinds(&events), vec![EventKind::Created, EventKind::GeofenceExited]);
        assert_eq!(state.get(&id("v")).unwrap().last_status, GeofenceStatus::Outside);
    }

    #[test]
    fn test_speed_alert_on_transition_only() {
        let mut tracker = FleetTracker::with_reference(reference());
        let fast = snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544, "speed": 72 } }));
        let slow = snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544, "speed": 30 } }));

        assert_eq!(kinds(&tracker.apply(&fast)), vec![EventKind::Created, EventKind::SpeedAlert]);
        assert_eq!(kinds(&tracker.apply(&fast)), vec![EventKind::Updated]);
        assert_eq!(kinds(&tracker.apply(&slow)), vec![EventKind::Updated]);
        assert_eq!(kinds(&tracker.apply(&fast)), vec![EventKind::Updated, EventKind::SpeedAlert]);
        assert_eq!(tracker.stats().speed_alerts, 2);
    }

    #[test]
    fn test_event_order_within_vehicle() {
        let (_, events) = reconcile(
            FleetState::default(),
            &snapshot(json!({ "v": { "lat": 11.30, "lng": 7.80, "speed": 90 } })),
            &reference(),
        );
        assert_eq!(
            kinds(&events),
            vec![EventKind::Created, EventKind::GeofenceExited, EventKind::SpeedAlert]
        );
        // All events of one step share the same projection
        assert_eq!(events[0].view, events[2].view);
    }

    #[test]
    fn test_skip_on_invalid() {
        let mut tracker = FleetTracker::with_reference(reference());
        let events = tracker.apply(&snapshot(json!({
            "bad1": { "lat": null, "lng": 7.6544 },
            "bad2": { "lat": "abc", "lng": 7.6544 },
            "good": { "lat": 11.1533, "lng": 7.6544 }
        })));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].vehicle_id(), &id("good"));
        assert!(!tracker.state().contains(&id("bad1")));
        assert!(!tracker.state().contains(&id("bad2")));
        assert_eq!(tracker.stats().records_skipped, 2);
        assert_eq!(tracker.stats().records_applied, 1);
    }

    #[test]
    fn test_invalid_update_leaves_state_untouched() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544, "speed": 20 } })));
        let before = tracker.view(&id("v")).unwrap();

        let events = tracker.apply(&snapshot(json!({ "v": { "lat": "abc", "lng": 7.6544, "speed": 99 } })));
        assert!(events.is_empty());
        assert_eq!(tracker.view(&id("v")).unwrap(), before);
    }

    #[test]
    fn test_empty_snapshot_is_noop() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544 } })));

        assert!(tracker.apply(&snapshot(Value::Null)).is_empty());
        assert!(tracker.apply(&snapshot(json!({}))).is_empty());
        assert_eq!(tracker.state().len(), 1);
        assert_eq!(tracker.state().get(&id("v")).unwrap().trail().len(), 1);
        assert_eq!(tracker.stats().empty_snapshots, 2);
    }

    #[test]
    fn test_absent_vehicle_carried_over() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({
            "a": { "lat": 11.1533, "lng": 7.6544 },
            "b": { "lat": 11.16, "lng": 7.66 }
        })));
        let b_before = tracker.view(&id("b")).unwrap();

        let events = tracker.apply(&snapshot(json!({ "a": { "lat": 11.154, "lng": 7.655 } })));
        assert_eq!(events.len(), 1);
        assert_eq!(tracker.view(&id("b")).unwrap(), b_before);
        assert_eq!(tracker.state().len(), 2);
    }

    #[test]
    fn test_colors_assigned_once_by_arrival() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({ "z": { "lat": 11.1533, "lng": 7.6544 } })));
        tracker.apply(&snapshot(json!({
            "a": { "lat": 11.1533, "lng": 7.6544 },
            "z": { "lat": 11.1533, "lng": 7.6544 }
        })));

        // "z" arrived first even though "a" sorts first later on
        assert_eq!(tracker.view(&id("z")).unwrap().color, "blue");
        assert_eq!(tracker.view(&id("a")).unwrap().color, "green");

        for _ in 0..3 {
            tracker.apply(&snapshot(json!({ "z": { "lat": 11.2, "lng": 7.7 } })));
        }
        assert_eq!(tracker.view(&id("z")).unwrap().color, "blue");
    }

    #[test]
    fn test_palette_wraps() {
        let state = FleetState::new(vec!["red".into(), "teal".into()], Resolution::Seven).unwrap();
        let (_, events) = reconcile(
            state,
            &snapshot(json!({
                "1": { "lat": 11.1533, "lng": 7.6544 },
                "2": { "lat": 11.1533, "lng": 7.6544 },
                "3": { "lat": 11.1533, "lng": 7.6544 }
            })),
            &reference(),
        );
        let colors: Vec<&str> = events.iter().map(|e| e.view.color.as_str()).collect();
        assert_eq!(colors, vec!["red", "teal", "red"]);
    }

    #[test]
    fn test_palette_colours_only_from_created_events() {
        // Outside the fence: every vehicle emits Created then GeofenceExited
        let state = FleetState::new(vec!["red".into(), "teal".into()], Resolution::Seven).unwrap();
        let (_, events) = reconcile(
            state,
            &snapshot(json!({
                "1": { "lat": 11.0, "lng": 7.0 },
                "2": { "lat": 11.0, "lng": 7.0 },
                "3": { "lat": 11.0, "lng": 7.0 }
            })),
            &reference(),
        );
        assert_eq!(events.len(), 6);
        let colors: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == EventKind::Created)
            .map(|e| e.view.color.as_str())
            .collect();
        assert_eq!(colors, vec!["red", "teal", "red"]);
    }

    #[test]
    fn test_empty_palette_rejected() {
        let result = FleetState::new(Vec::new(), Resolution::Seven);
        assert!(matches!(result, Err(ConfigError::EmptyPalette)));
    }

    #[test]
    fn test_events_of_one_step_share_trail() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544 } })));

        // Exit and speed alert in the same step: three events
        let events = tracker.apply(&snapshot(json!({
            "v": { "lat": 11.0, "lng": 7.0, "speed": 90.0 }
        })));
        assert_eq!(events.len(), 3);
        assert!(Arc::ptr_eq(&events[0].view.trail, &events[1].view.trail));
        assert!(Arc::ptr_eq(&events[0].view.trail, &events[2].view.trail));

        let state = tracker.state().get(&id("v")).unwrap();
        assert!(Arc::ptr_eq(&events[0].view.trail, &state.trail));
        assert_eq!(events[0].view.trail.len(), 2);
    }

    #[test]
    fn test_held_view_keeps_older_trail() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544 } })));
        let held = tracker.view(&id("v")).unwrap();

        // A view still held keeps its own copy of the older trail
        tracker.apply(&snapshot(json!({ "v": { "lat": 11.1534, "lng": 7.6544 } })));
        assert_eq!(held.trail.len(), 1);
        assert_eq!(tracker.view(&id("v")).unwrap().trail.len(), 2);
    }

    #[test]
    fn test_vehicles_near_clamps_ring_count() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({ "v": { "lat": 11.1533, "lng": 7.6544 } })));

        let centre = Position::new(11.1533, 7.6544);
        let clamped = tracker.vehicles_near(centre, u32::MAX);
        assert_eq!(clamped.len(), 1);
        assert_eq!(clamped[0].id, id("v"));
    }

    #[test]
    fn test_control_and_override_status() {
        let mut tracker = FleetTracker::with_reference(reference());
        let events = tracker.apply(&snapshot(json!({
            "v": {
                "lat": 11.1533, "lng": 7.6544,
                "override": true,
                "control": { "command": "SHUT_OFF", "timestamp": "2024-01-01T00:00:00.000Z" }
            }
        })));
        assert_eq!(events[0].view.override_status, OverrideStatus::On);
        assert_eq!(events[0].view.engine_status, EngineStatus::ShutOff);

        let events = tracker.apply(&snapshot(json!({
            "v": {
                "lat": 11.1533, "lng": 7.6544,
                "override": false,
                "control": { "command": "RESTORE" }
            }
        })));
        assert_eq!(events[0].view.override_status, OverrideStatus::Off);
        assert_eq!(events[0].view.engine_status, EngineStatus::Running);
    }

    #[test]
    fn test_status_rows() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({
            "1": { "lat": 11.1533, "lng": 7.6544, "speed": 40 },
            "2": { "lat": 11.30, "lng": 7.80 }
        })));
        let rows = tracker.status_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "Inside");
        assert_eq!(rows[1].status, "⚠ Outside");
        assert_eq!(rows[1].speed, "0");
    }

    #[test]
    fn test_vehicles_near() {
        let mut tracker = FleetTracker::with_reference(reference());
        tracker.apply(&snapshot(json!({
            "near": { "lat": 11.1533, "lng": 7.6544 },
            "far": { "lat": 12.5, "lng": 8.9 }
        })));

        let found = tracker.vehicles_near(Position::new(11.1533, 7.6544), 1);
        let ids: Vec<&str> = found.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["near"]);

        // "near" drives away; the index follows it
        tracker.apply(&snapshot(json!({ "near": { "lat": 12.5, "lng": 8.9 } })));
        assert!(tracker.vehicles_near(Position::new(11.1533, 7.6544), 1).is_empty());
        assert_eq!(tracker.vehicles_near(Position::new(12.5, 8.9), 0).len(), 2);
    }

    #[test]
    fn test_from_config() {
        let config = FleetConfig {
            palette: vec!["black".to_string()],
            ..Default::default()
        };
        let mut tracker = FleetTracker::from_config(&config).unwrap();
        tracker.apply(&snapshot(json!({ "v": { "lat": 11.1556, "lng": 7.6625 } })));
        assert_eq!(tracker.view(&id("v")).unwrap().color, "black");
        assert_eq!(tracker.reference(), &config.reference);
    }

    // One delivery: (vehicle index, whether the record is valid, lat offset)
    fn delivery() -> impl Strategy<Value = (u8, bool, f64)> {
        (0u8..4, any::<bool>(), -0.2f64..0.2)
    }

    proptest! {
        #[test]
        fn prop_trail_length_matches_valid_deliveries(
            deliveries in proptest::collection::vec(delivery(), 1..60)
        ) {
            let mut tracker = FleetTracker::with_reference(reference());
            let mut expected = [0usize; 4];

            for (vehicle, valid, offset) in &deliveries {
                let record = if *valid {
                    json!({ "lat": 11.1533 + offset, "lng": 7.6544 })
                } else {
                    json!({ "lat": "abc", "lng": 7.6544 })
                };
                // Every other vehicle rides along with a null slot
                let mut snap = Snapshot::empty();
                snap.insert(format!("v{}", vehicle), record);
                snap.insert("ghost", Value::Null);
                tracker.apply(&snap);
                if *valid {
                    expected[*vehicle as usize] += 1;
                }
            }

            for (index, count) in expected.iter().enumerate() {
                let key = id(&format!("v{}", index));
                match tracker.state().get(&key) {
                    Some(vehicle) => {
                        prop_assert_eq!(vehicle.trail().len(), *count);
                        prop_assert_eq!(vehicle.updates as usize, *count);
                    }
                    None => prop_assert_eq!(*count, 0),
                }
            }
            prop_assert!(!tracker.state().contains(&id("ghost")));
        }

        #[test]
        fn prop_transitions_alternate(
            offsets in proptest::collection::vec(-0.3f64..0.3, 1..40)
        ) {
            let mut tracker = FleetTracker::with_reference(reference());
            let mut transitions = Vec::new();
            for offset in &offsets {
                let events = tracker.apply(&snapshot(json!({
                    "v": { "lat": 11.1533 + offset, "lng": 7.6544 }
                })));
                transitions.extend(
                    events.into_iter()
                        .map(|e| e.kind)
                        .filter(|k| matches!(k, EventKind::GeofenceExited | EventKind::GeofenceEntered)),
                );
            }

            // Exits and entries strictly alternate, starting with an exit
            for (i, kind) in transitions.iter().enumerate() {
                let expected = if i % 2 == 0 { EventKind::GeofenceExited } else { EventKind::GeofenceEntered };
                prop_assert_eq!(*kind, expected);
            }
        }
    }
}
