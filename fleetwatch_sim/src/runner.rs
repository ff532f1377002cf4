//! Scenario runner - drives the monitor against the simulated store.
//!
//! Each tick:
//! 1. the oracle moves every vehicle and the virtual clock advances,
//! 2. the scenario plan may change cruise speeds or send commands,
//! 3. the oracle pushes one telemetry batch,
//! 4. the monitor reconciles every snapshot the store published.
//!
//! After the run the reconciled fleet is checked against the oracle's record
//! of what the store actually delivered.

use crate::context::SimContext;
use crate::exporter::{SimEvent, SimExport, SimFrame, VehicleFrame};
use crate::oracle::{ExpectedTransitions, Oracle};
use crate::scenarios::ScenarioId;
use crate::store::{SimStoreController, SimVehicleStore};

use fleetwatch_core::{
    CommandDispatcher, CommandPayload, ConfigError, DispatchError, EngineStatus, EventKind,
    FleetConfig, FleetMonitor, Notification, OverrideStatus, Position, ReconciliationEvent,
    Severity, VehicleCommand,
};
use fleetwatch_env::{FleetContext, StoreController, VehicleId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Meters per degree of latitude, for laying out routes.
const METERS_PER_DEGREE: f64 = 111_195.0;

/// RNG streams derived from the run seed
const PHYSICS_STREAM: u64 = 1;
const FAULT_STREAM: u64 = 2;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: ScenarioId,
    pub seed: u64,

    /// Whether scenario passed all checks
    pub passed: bool,

    pub total_ticks: u64,
    pub final_time_secs: f64,

    /// Vehicles the monitor is tracking at the end
    pub final_vehicle_count: usize,

    pub failure_reason: Option<String>,
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    pub snapshots: u64,
    pub records_applied: u64,
    pub records_skipped: u64,

    /// Telemetry pushes with garbage coordinates
    pub glitches: u64,

    pub geofence_exits: u64,
    pub geofence_entries: u64,
    pub speed_alerts: u64,
    pub notifications: u64,

    /// Commands the store accepted
    pub commands_sent: u64,

    /// Individual write attempts the store rejected
    pub write_failures: u64,

    /// Commands abandoned after all attempts failed
    pub commands_abandoned: u64,
}

/// Runs fleet scenarios.
pub struct ScenarioRunner {
    seed: u64,
    num_vehicles: usize,

    /// Seconds of simulated time between telemetry pushes
    interval_secs: f64,

    max_duration_secs: f64,
    config: FleetConfig,

    /// Attempts per command before giving up
    max_attempts: u32,

    /// Export a frame every N ticks
    export_every: u64,
}

impl ScenarioRunner {
    pub fn new(seed: u64, num_vehicles: usize) -> Self {
        Self {
            seed,
            num_vehicles: num_vehicles.max(1),
            interval_secs: 5.0,
            max_duration_secs: 600.0,
            config: FleetConfig::default(),
            max_attempts: 25,
            export_every: 1,
        }
    }

    pub fn with_interval(mut self, secs: f64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_config(mut self, config: FleetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_export_every(mut self, ticks: u64) -> Self {
        self.export_every = ticks.max(1);
        self
    }

    pub fn total_ticks(&self) -> u64 {
        if self.interval_secs <= 0.0 {
            return 0;
        }
        (self.max_duration_secs / self.interval_secs) as u64
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario, recording frames for replay.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.execute(scenario, Some(&mut export));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let runtime = match tokio::runtime::Builder::new_current_thread().build() {
            Ok(runtime) => runtime,
            Err(e) => return self.aborted(scenario, format!("Failed to start runtime: {}", e)),
        };
        runtime.block_on(self.simulate(scenario, export))
    }

    async fn simulate(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        let mut sim = match FleetSim::new(self, scenario, export.is_some()) {
            Ok(sim) => sim,
            Err(e) => return self.aborted(scenario, format!("Invalid configuration: {}", e)),
        };

        let total_ticks = self.total_ticks();
        for tick in 0..total_ticks {
            sim.tick(tick, total_ticks).await;

            if let Some(export) = export.as_deref_mut() {
                if tick % self.export_every == 0 {
                    export.add_frame(sim.frame());
                }
            }
            if tick % 12 == 0 {
                debug!(
                    "  t={:.0}s | vehicles={} | snapshots={}",
                    sim.oracle.time(),
                    sim.monitor.tracker().state().len(),
                    sim.monitor.tracker().stats().snapshots
                );
            }
        }

        let final_time_secs = sim.oracle.time();
        let final_vehicle_count = sim.monitor.tracker().state().len();
        let views = sim.monitor.tracker().views();
        let (violations, metrics) = sim.finish();

        let passed = violations.is_empty();
        let failure_reason = if passed { None } else { Some(violations.join("; ")) };
        if let Some(reason) = &failure_reason {
            error!("Scenario {} failed: {}", scenario.name(), reason);
        }
        if let Some(export) = export {
            export.finalize(views.iter(), passed, failure_reason.clone());
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks,
            final_time_secs,
            final_vehicle_count,
            failure_reason,
            metrics,
        }
    }

    fn aborted(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        error!("Scenario {} aborted: {}", scenario.name(), reason);
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_vehicle_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

// ============================================================================
// SIMULATION STATE
// ============================================================================

/// Everything one scenario run owns.
struct FleetSim {
    scenario: ScenarioId,
    config: FleetConfig,
    interval_secs: f64,
    max_attempts: u32,

    context: Arc<SimContext>,
    store: Arc<SimVehicleStore>,
    oracle: Oracle,
    monitor: FleetMonitor<SimContext, SimVehicleStore>,
    dispatcher: CommandDispatcher<SimContext, SimVehicleStore>,
    events: mpsc::Receiver<ReconciliationEvent>,

    /// The vehicle each scenario singles out
    lead: VehicleId,
    ids: Vec<VehicleId>,

    /// Event kinds received per vehicle, in order
    observed: BTreeMap<VehicleId, Vec<EventKind>>,

    /// Last accepted value per written path
    landed: BTreeMap<String, Value>,

    parked_at: Option<Position>,
    metrics: ScenarioMetrics,
    violations: Vec<String>,

    record_frames: bool,
    frame_events: Vec<SimEvent>,
}

impl FleetSim {
    fn new(runner: &ScenarioRunner, scenario: ScenarioId, record_frames: bool) -> Result<Self, ConfigError> {
        let mut config = runner.config.clone();
        // One snapshot may produce up to three events per vehicle and the
        // runner drains only between snapshots
        config.event_buffer = config.event_buffer.max(runner.num_vehicles * 3);

        let context = SimContext::shared(runner.seed);
        let controller = Arc::new(SimStoreController::new(
            context.derive_rng(FAULT_STREAM),
        ));
        let store = Arc::new(SimVehicleStore::new(context.clone(), controller));
        let (monitor, events) = FleetMonitor::new(context.clone(), store.clone(), &config)?;
        let dispatcher = monitor.dispatcher();

        let mut oracle = Oracle::new(context.derive_rng(PHYSICS_STREAM));
        let ids = spawn_fleet(&mut oracle, scenario, &config, runner.num_vehicles);

        match scenario {
            ScenarioId::GlitchyTelemetry => oracle.set_glitch_rate(0.2),
            ScenarioId::FlakyUplink => store.controller().set_write_failure_rate(0.4),
            _ => {}
        }

        Ok(Self {
            scenario,
            config,
            interval_secs: runner.interval_secs,
            max_attempts: runner.max_attempts,
            context,
            store,
            oracle,
            monitor,
            dispatcher,
            events,
            lead: ids[0].clone(),
            ids,
            observed: BTreeMap::new(),
            landed: BTreeMap::new(),
            parked_at: None,
            metrics: ScenarioMetrics::default(),
            violations: Vec::new(),
            record_frames,
            frame_events: Vec::new(),
        })
    }

    async fn tick(&mut self, tick: u64, total_ticks: u64) {
        self.oracle.step(self.interval_secs);
        self.context
            .sleep(Duration::from_secs_f64(self.interval_secs))
            .await;

        self.apply_plan(tick, total_ticks).await;
        self.oracle.sync_controls(&self.store);

        let batch = self.oracle.generate_telemetry();
        self.store.push_telemetry_batch(batch);

        self.drain().await;
    }

    /// Scenario-specific actions at fixed points of the run.
    async fn apply_plan(&mut self, tick: u64, total_ticks: u64) {
        let quarter = total_ticks / 4;
        let half = total_ticks / 2;
        let three_quarters = total_ticks * 3 / 4;
        let limit = self.config.reference.speed_limit_kmh;
        let lead = self.lead.clone();

        match self.scenario {
            ScenarioId::Speeding => {
                if tick == quarter || tick == three_quarters {
                    self.oracle.set_cruise(&lead, limit * 1.6);
                } else if tick == half {
                    self.oracle.set_cruise(&lead, limit * 0.8);
                }
            }
            ScenarioId::ShutdownDrill => {
                if tick == half {
                    self.command(&lead, VehicleCommand::ShutOff).await;
                    self.parked_at = self.oracle.vehicle(&lead).map(|v| v.position);
                } else if tick == three_quarters {
                    self.check_parked();
                    self.command(&lead, VehicleCommand::Restore).await;
                }
            }
            ScenarioId::FlakyUplink => {
                if tick == half {
                    for id in self.ids.clone() {
                        self.command(&id, VehicleCommand::OverrideOn).await;
                    }
                } else if tick == three_quarters {
                    self.command(&lead, VehicleCommand::ShutOff).await;
                }
            }
            ScenarioId::Patrol | ScenarioId::Breakout | ScenarioId::GlitchyTelemetry => {}
        }
    }

    /// Send a command, resending the same payload on failure.
    async fn command(&mut self, id: &VehicleId, command: VehicleCommand) -> bool {
        let mut outcome = self
            .dispatcher
            .dispatch(id, command)
            .await
            .map(|receipt| receipt.payload);
        let mut attempts = 1;

        loop {
            match outcome {
                Ok(payload) => {
                    // Every accepted write republishes the collection
                    self.oracle.note_publish();
                    self.metrics.commands_sent += 1;
                    self.note(command.acknowledgement(id), Severity::Info);
                    self.landed.insert(payload.path, payload.value);
                    return true;
                }
                Err(DispatchError::WriteFailed { payload, source }) if attempts < self.max_attempts => {
                    self.metrics.write_failures += 1;
                    debug!(vehicle = %id, attempt = attempts, error = %source, "Retrying command");
                    attempts += 1;
                    outcome = self.resend(payload).await;
                }
                Err(err) => {
                    if matches!(err, DispatchError::WriteFailed { .. }) {
                        self.metrics.write_failures += 1;
                    }
                    self.metrics.commands_abandoned += 1;
                    warn!(vehicle = %id, command = %command, error = %err, "Giving up on command");
                    self.violations
                        .push(format!("{} for {} never landed: {}", command, id, err));
                    return false;
                }
            }
        }
    }

    async fn resend(&self, payload: CommandPayload) -> Result<CommandPayload, DispatchError> {
        self.dispatcher.resend(&payload).await?;
        Ok(payload)
    }

    /// Reconcile every snapshot the store has published.
    async fn drain(&mut self) {
        while self.store.pending_snapshots() > 0 {
            if self.monitor.step().await.is_none() {
                break;
            }
            self.collect_events();
        }
    }

    fn collect_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if let Some(notice) = Notification::from_event(&event) {
                self.metrics.notifications += 1;
                self.note(notice.message, notice.severity);
            }
            self.observed
                .entry(event.vehicle_id().clone())
                .or_default()
                .push(event.kind);
        }
    }

    fn note(&mut self, message: String, severity: Severity) {
        if self.record_frames {
            let level = match severity {
                Severity::Info => "info",
                Severity::Warning => "warning",
            };
            self.frame_events.push(SimEvent {
                message,
                level: Some(level.to_string()),
            });
        }
    }

    fn frame(&mut self) -> SimFrame {
        let tracker = self.monitor.tracker();
        let vehicles = self
            .oracle
            .vehicles()
            .map(|truth| VehicleFrame::new(truth, tracker.view(&truth.id).as_ref()))
            .collect();

        SimFrame {
            time_sec: self.oracle.time(),
            vehicles,
            events: std::mem::take(&mut self.frame_events),
        }
    }

    fn check_parked(&mut self) {
        let lead = self.lead.clone();
        let truth = self.oracle.vehicle(&lead).map(|v| v.position);
        if truth != self.parked_at {
            self.violations
                .push(format!("{} kept moving after SHUT_OFF", lead));
        }

        match self.monitor.tracker().view(&lead) {
            Some(view) if view.engine_status == EngineStatus::ShutOff && view.speed_kmh == 0.0 => {}
            Some(view) => self.violations.push(format!(
                "{} reported {} at {} km/h while shut off",
                lead,
                view.engine_status.label(),
                view.speed_kmh
            )),
            None => self.violations.push(format!("{} is not tracked", lead)),
        }
    }

    fn count(&self, id: &VehicleId, kind: EventKind) -> u64 {
        self.observed
            .get(id)
            .map_or(0, |kinds| kinds.iter().filter(|k| **k == kind).count() as u64)
    }

    fn total(&self, kind: EventKind) -> u64 {
        self.ids.iter().map(|id| self.count(id, kind)).sum()
    }

    /// Run every check and hand back the violations and final metrics.
    fn finish(mut self) -> (Vec<String>, ScenarioMetrics) {
        self.check_against_oracle();
        self.check_scenario();

        let stats = self.monitor.tracker().stats();
        let mut metrics = self.metrics.clone();
        metrics.snapshots = stats.snapshots;
        metrics.records_applied = stats.records_applied;
        metrics.records_skipped = stats.records_skipped;
        metrics.geofence_exits = stats.geofence_exits;
        metrics.geofence_entries = stats.geofence_entries;
        metrics.speed_alerts = stats.speed_alerts;
        metrics.glitches = self.oracle.glitches();

        (self.violations, metrics)
    }

    /// Checks that hold for every scenario.
    fn check_against_oracle(&mut self) {
        let reference = self.config.reference;
        let mut violations = Vec::new();

        for id in &self.ids {
            let history = self.oracle.history(id);
            let trail = self
                .monitor
                .tracker()
                .state()
                .get(id)
                .map(|vehicle| vehicle.trail().to_vec())
                .unwrap_or_default();
            let delivered: Vec<Position> = history.iter().map(|d| d.position).collect();
            if trail != delivered {
                violations.push(format!(
                    "trail of {} has {} points, store delivered {} valid records",
                    id,
                    trail.len(),
                    delivered.len()
                ));
            }

            let expected = self.oracle.expected_transitions(id, &reference);
            let observed = ExpectedTransitions {
                exits: self.count(id, EventKind::GeofenceExited),
                entries: self.count(id, EventKind::GeofenceEntered),
                speed_alerts: self.count(id, EventKind::SpeedAlert),
            };
            if observed != expected {
                violations.push(format!(
                    "{} transitions {:?}, expected {:?}",
                    id, observed, expected
                ));
            }

            let fence: Vec<EventKind> = self
                .observed
                .get(id)
                .map(|kinds| {
                    kinds
                        .iter()
                        .copied()
                        .filter(|k| matches!(k, EventKind::GeofenceExited | EventKind::GeofenceEntered))
                        .collect()
                })
                .unwrap_or_default();
            let alternates = fence.iter().enumerate().all(|(i, kind)| {
                let want = if i % 2 == 0 {
                    EventKind::GeofenceExited
                } else {
                    EventKind::GeofenceEntered
                };
                *kind == want
            });
            if !alternates {
                violations.push(format!("{} geofence transitions do not alternate", id));
            }
        }

        self.violations.extend(violations);
    }

    /// What each scenario is specifically about.
    fn check_scenario(&mut self) {
        let lead = self.lead.clone();
        let tracker = self.monitor.tracker();

        match self.scenario {
            ScenarioId::Patrol => {
                let alerts = self.total(EventKind::GeofenceExited) + self.total(EventKind::SpeedAlert);
                if alerts > 0 {
                    self.violations
                        .push(format!("{} alerts raised on a quiet patrol", alerts));
                }
            }
            ScenarioId::Breakout => {
                if self.count(&lead, EventKind::GeofenceExited) == 0
                    || self.count(&lead, EventKind::GeofenceEntered) == 0
                {
                    self.violations
                        .push(format!("{} never left and re-entered the fence", lead));
                }
                if self.total(EventKind::GeofenceExited) != self.count(&lead, EventKind::GeofenceExited) {
                    self.violations
                        .push("a patrolling vehicle left the fence".to_string());
                }
            }
            ScenarioId::Speeding => {
                let lead_alerts = self.count(&lead, EventKind::SpeedAlert);
                let fleet_alerts = self.total(EventKind::SpeedAlert);
                if lead_alerts != 2 || fleet_alerts != 2 {
                    self.violations.push(format!(
                        "expected exactly 2 speed alerts for {}, got {} ({} fleet-wide)",
                        lead, lead_alerts, fleet_alerts
                    ));
                }
            }
            ScenarioId::GlitchyTelemetry => {
                let skipped = tracker.stats().records_skipped;
                let glitches = self.oracle.glitches();
                if glitches == 0 || skipped != glitches {
                    self.violations.push(format!(
                        "{} glitched pushes but {} records skipped",
                        glitches, skipped
                    ));
                }
            }
            ScenarioId::ShutdownDrill => {
                let running = tracker
                    .view(&lead)
                    .map_or(false, |view| view.engine_status == EngineStatus::Running);
                let truth_running = self.oracle.vehicle(&lead).map_or(false, |v| v.engine_on);
                if !running || !truth_running {
                    self.violations
                        .push(format!("{} did not come back after RESTORE", lead));
                }
            }
            ScenarioId::FlakyUplink => {
                let mut missing = Vec::new();
                for (path, value) in &self.landed {
                    if self.store.read(path).as_ref() != Some(value) {
                        missing.push(path.clone());
                    }
                }
                let all_overridden = self.ids.iter().all(|id| {
                    tracker
                        .view(id)
                        .map_or(false, |view| view.override_status == OverrideStatus::On)
                });
                if !missing.is_empty() {
                    self.violations
                        .push(format!("store lost writes at {}", missing.join(", ")));
                }
                if !all_overridden {
                    self.violations
                        .push("override not shown ON for every vehicle".to_string());
                }
            }
        }
    }
}

/// Lay out the fleet for a scenario. The first id is the lead vehicle.
fn spawn_fleet(oracle: &mut Oracle, scenario: ScenarioId, config: &FleetConfig, count: usize) -> Vec<VehicleId> {
    let reference = &config.reference;
    let center = reference.center();
    let radius_m = reference.geofence_radius_m;
    let limit = reference.speed_limit_kmh;

    (0..count)
        .map(|i| {
            let id = format!("veh{}", i + 1);
            let lead = i == 0;

            if lead && scenario == ScenarioId::Breakout {
                // Shuttle across the northern edge of the fence
                let inside = offset(center, radius_m * 0.97, 0.0);
                let outside = offset(center, radius_m * 1.03, 0.0);
                return oracle.spawn_vehicle(id, vec![inside, outside], limit * 0.9);
            }

            let spread = radius_m * (0.2 + 0.1 * (i % 4) as f64);
            let loop_route = vec![
                offset(center, spread, spread),
                offset(center, spread, -spread),
                offset(center, -spread, -spread),
                offset(center, -spread, spread),
            ];
            let cruise = if lead && scenario == ScenarioId::Speeding {
                limit * 0.8
            } else {
                limit * (0.6 + 0.05 * (i % 4) as f64)
            };
            oracle.spawn_vehicle(id, loop_route, cruise)
        })
        .collect()
}

/// Position `north_m` / `east_m` away from `from`.
fn offset(from: Position, north_m: f64, east_m: f64) -> Position {
    Position::new(
        from.lat + north_m / METERS_PER_DEGREE,
        from.lng + east_m / (METERS_PER_DEGREE * from.lat.to_radians().cos()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn runner(seed: u64) -> ScenarioRunner {
        ScenarioRunner::new(seed, 4)
    }

    #[test]
    fn test_patrol_scenario() {
        let result = runner(42).run(ScenarioId::Patrol);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_vehicle_count, 4);
        assert_eq!(result.metrics.geofence_exits, 0);
        assert_eq!(result.metrics.snapshots, result.total_ticks);
    }

    #[test]
    fn test_breakout_scenario() {
        let result = runner(42).run(ScenarioId::Breakout);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.geofence_exits >= 1);
        assert!(result.metrics.notifications >= 2);
    }

    #[test]
    fn test_speeding_scenario() {
        let result = runner(42).run(ScenarioId::Speeding);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.speed_alerts, 2);
    }

    #[test]
    fn test_glitchy_telemetry_scenario() {
        let result = runner(42).run(ScenarioId::GlitchyTelemetry);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.glitches > 0);
        assert_eq!(result.metrics.records_skipped, result.metrics.glitches);
    }

    #[test]
    fn test_shutdown_drill_scenario() {
        let result = runner(42).run(ScenarioId::ShutdownDrill);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.commands_sent, 2);
    }

    #[test]
    fn test_flaky_uplink_scenario() {
        let result = runner(42).run(ScenarioId::FlakyUplink);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.commands_sent, 5);
        assert_eq!(result.metrics.commands_abandoned, 0);
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let a = runner(7).run(ScenarioId::FlakyUplink);
        let b = runner(7).run(ScenarioId::FlakyUplink);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_export_records_frames() {
        let (result, export) = runner(3)
            .with_duration(60.0)
            .with_export_every(2)
            .run_with_export(ScenarioId::Patrol);
        assert!(result.passed);
        assert_eq!(export.frames.len(), 6);
        assert_eq!(export.trails.len(), 4);
        assert_eq!(export.frames[0].vehicles.len(), 4);
    }

    #[test]
    fn test_invalid_config_aborts() {
        let mut config = FleetConfig::default();
        config.palette.clear();
        let result = runner(1).with_config(config).run(ScenarioId::Patrol);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("Invalid configuration"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_glitchy_runs_match_oracle(seed in any::<u64>(), vehicles in 1usize..6) {
            let result = ScenarioRunner::new(seed, vehicles)
                .with_duration(150.0)
                .run(ScenarioId::GlitchyTelemetry);
            // Short runs may see no glitch at all; everything else must hold
            let only_no_glitch = result.metrics.glitches == 0
                && result.failure_reason.as_deref().map_or(false, |r| r.starts_with("0 glitched"));
            prop_assert!(result.passed || only_no_glitch, "{:?}", result.failure_reason);
        }
    }
}
