//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated fleet:
//! - True positions of all vehicles, driven along waypoint loops
//! - Telemetry generation (GPS noise, occasional garbage coordinates)
//! - Engine response to control commands found in the store
//! - The exact sequence of valid records the store has delivered

use fleetwatch_core::{evaluate, haversine_distance_m, AdminReference, GeofenceStatus, Position};
use fleetwatch_env::VehicleId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::store::SimVehicleStore;

/// Meters per degree of latitude on the reference sphere.
const METERS_PER_DEGREE: f64 = 111_195.0;

/// A ground truth vehicle in the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthVehicle {
    pub id: VehicleId,
    pub position: Position,

    /// Loop of positions the vehicle drives through
    pub waypoints: Vec<Position>,
    next_waypoint: usize,

    /// Speed while the engine runs (km/h)
    pub cruise_kmh: f64,

    pub engine_on: bool,
    pub override_on: bool,
}

impl GroundTruthVehicle {
    /// Speed the vehicle is actually doing.
    pub fn speed_kmh(&self) -> f64 {
        if self.engine_on {
            self.cruise_kmh
        } else {
            0.0
        }
    }

    fn drive(&mut self, dt: f64) {
        if !self.engine_on || self.waypoints.is_empty() {
            return;
        }

        let mut remaining_m = self.cruise_kmh / 3.6 * dt;
        // Bounded by the loop size so a zero-length loop can't spin forever
        for _ in 0..=self.waypoints.len() {
            let target = self.waypoints[self.next_waypoint];
            let to_target = haversine_distance_m(self.position, target);
            if to_target > remaining_m {
                let fraction = remaining_m / to_target;
                self.position = Position::new(
                    self.position.lat + (target.lat - self.position.lat) * fraction,
                    self.position.lng + (target.lng - self.position.lng) * fraction,
                );
                return;
            }
            remaining_m -= to_target;
            self.position = target;
            self.next_waypoint = (self.next_waypoint + 1) % self.waypoints.len();
        }
    }
}

/// One valid record as delivered by the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub position: Position,
    pub speed_kmh: f64,
}

/// Transition counts implied by a delivery history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedTransitions {
    pub exits: u64,
    pub entries: u64,
    pub speed_alerts: u64,
}

/// The Oracle - maintains ground truth and generates telemetry.
pub struct Oracle {
    rng: ChaCha8Rng,
    vehicles: BTreeMap<VehicleId, GroundTruthVehicle>,

    /// Current simulation time (seconds)
    current_time: f64,

    /// GPS noise standard deviation (meters)
    position_noise_m: f64,

    /// Probability that a telemetry push carries unusable coordinates
    glitch_rate: f64,
    glitches: u64,

    /// Valid records delivered per vehicle, in delivery order
    history: BTreeMap<VehicleId, Vec<Delivery>>,

    /// What the store currently holds for each vehicle, if it parses
    stored: BTreeMap<VehicleId, Option<Delivery>>,
}

impl Oracle {
    /// Creates a new Oracle drawing physics noise from `rng`.
    ///
    /// The stream should be separate from the store's fault stream so that
    /// changing fault injection doesn't affect trajectories.
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            vehicles: BTreeMap::new(),
            current_time: 0.0,
            position_noise_m: 3.0,
            glitch_rate: 0.0,
            glitches: 0,
            history: BTreeMap::new(),
            stored: BTreeMap::new(),
        }
    }

    pub fn set_position_noise(&mut self, std_dev_m: f64) {
        self.position_noise_m = std_dev_m.max(0.0);
    }

    pub fn set_glitch_rate(&mut self, rate: f64) {
        self.glitch_rate = rate.clamp(0.0, 1.0);
    }

    /// Adds a vehicle at the first waypoint.
    pub fn spawn_vehicle(&mut self, id: impl Into<VehicleId>, waypoints: Vec<Position>, cruise_kmh: f64) -> VehicleId {
        let id = id.into();
        let position = waypoints.first().copied().unwrap_or(Position::new(0.0, 0.0));
        let next_waypoint = if waypoints.len() > 1 { 1 } else { 0 };

        self.vehicles.insert(
            id.clone(),
            GroundTruthVehicle {
                id: id.clone(),
                position,
                waypoints,
                next_waypoint,
                cruise_kmh,
                engine_on: true,
                override_on: false,
            },
        );
        id
    }

    pub fn set_cruise(&mut self, id: &VehicleId, cruise_kmh: f64) {
        if let Some(vehicle) = self.vehicles.get_mut(id) {
            vehicle.cruise_kmh = cruise_kmh;
        }
    }

    /// Advances physics by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        for vehicle in self.vehicles.values_mut() {
            vehicle.drive(dt);
        }
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn vehicle(&self, id: &VehicleId) -> Option<&GroundTruthVehicle> {
        self.vehicles.get(id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &GroundTruthVehicle> {
        self.vehicles.values()
    }

    pub fn glitches(&self) -> u64 {
        self.glitches
    }

    /// One telemetry push per vehicle, to be published as a single batch.
    pub fn generate_telemetry(&mut self) -> Vec<(VehicleId, Value)> {
        let noise = Normal::new(0.0, self.position_noise_m).ok();
        let speed_noise = Normal::new(0.0, 1.0).ok();
        let mut batch = Vec::with_capacity(self.vehicles.len());

        for vehicle in self.vehicles.values() {
            let north_m = noise.map_or(0.0, |n| n.sample(&mut self.rng));
            let east_m = noise.map_or(0.0, |n| n.sample(&mut self.rng));
            let lat = vehicle.position.lat + north_m / METERS_PER_DEGREE;
            let lng = vehicle.position.lng
                + east_m / (METERS_PER_DEGREE * vehicle.position.lat.to_radians().cos());

            let speed = if vehicle.engine_on {
                let jitter = speed_noise.map_or(0.0, |n| n.sample(&mut self.rng));
                ((vehicle.cruise_kmh + jitter).max(0.0) * 10.0).round() / 10.0
            } else {
                0.0
            };

            let delivered = if self.glitch_rate > 0.0 && self.rng.gen::<f64>() < self.glitch_rate {
                self.glitches += 1;
                let garbage = if self.rng.gen::<bool>() { Value::Null } else { json!("abc") };
                batch.push((vehicle.id.clone(), json!({ "lat": garbage, "lng": lng, "speed": speed })));
                None
            } else {
                batch.push((vehicle.id.clone(), json!({ "lat": lat, "lng": lng, "speed": speed })));
                Some(Delivery {
                    position: Position::new(lat, lng),
                    speed_kmh: speed,
                })
            };
            self.stored.insert(vehicle.id.clone(), delivered);
        }

        self.note_publish();
        batch
    }

    /// Record that the store republished its current contents (after a
    /// telemetry batch or an accepted command write).
    pub fn note_publish(&mut self) {
        for (id, delivery) in &self.stored {
            if let Some(delivery) = delivery {
                self.history.entry(id.clone()).or_default().push(*delivery);
            }
        }
    }

    /// Apply control and override values the store holds for each vehicle.
    pub fn sync_controls(&mut self, store: &SimVehicleStore) {
        for vehicle in self.vehicles.values_mut() {
            let command = store.read(&vehicle.id.child_path("control/command"));
            match command.as_ref().and_then(Value::as_str) {
                Some("SHUT_OFF") => vehicle.engine_on = false,
                Some("RESTORE") => vehicle.engine_on = true,
                _ => {}
            }
            vehicle.override_on = store.read(&vehicle.id.child_path("override")) == Some(Value::Bool(true));
        }
    }

    /// Every valid record delivered for `id`, in order.
    pub fn history(&self, id: &VehicleId) -> &[Delivery] {
        self.history.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transitions a correct reconciler must report for `id`, starting from
    /// an inside and under-the-limit baseline.
    pub fn expected_transitions(&self, id: &VehicleId, reference: &AdminReference) -> ExpectedTransitions {
        let mut expected = ExpectedTransitions::default();
        let mut status = GeofenceStatus::Inside;
        let mut speeding = false;

        for delivery in self.history(id) {
            let reading = evaluate(delivery.position, reference);
            match (status, reading.status) {
                (GeofenceStatus::Inside, GeofenceStatus::Outside) => expected.exits += 1,
                (GeofenceStatus::Outside, GeofenceStatus::Inside) => expected.entries += 1,
                _ => {}
            }
            status = reading.status;

            let over = delivery.speed_kmh > reference.speed_limit_kmh;
            if over && !speeding {
                expected.speed_alerts += 1;
            }
            speeding = over;
        }

        expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn square(center: Position, offset: f64) -> Vec<Position> {
        vec![
            Position::new(center.lat + offset, center.lng + offset),
            Position::new(center.lat + offset, center.lng - offset),
            Position::new(center.lat - offset, center.lng - offset),
            Position::new(center.lat - offset, center.lng + offset),
        ]
    }

    #[test]
    fn test_vehicle_moves_at_cruise_speed() {
        let mut oracle = Oracle::new(ChaCha8Rng::seed_from_u64(42));
        let start = Position::new(11.15, 7.65);
        let id = oracle.spawn_vehicle("a", vec![start, Position::new(11.25, 7.65)], 36.0);

        oracle.step(10.0); // 36 km/h = 10 m/s
        let moved = haversine_distance_m(start, oracle.vehicle(&id).unwrap().position);
        assert!((moved - 100.0).abs() < 0.5);
    }

    #[test]
    fn test_shut_off_vehicle_stays_put() {
        let mut oracle = Oracle::new(ChaCha8Rng::seed_from_u64(42));
        let id = oracle.spawn_vehicle("a", square(Position::new(11.15, 7.65), 0.01), 60.0);
        oracle.vehicles.get_mut(&id).unwrap().engine_on = false;

        let before = oracle.vehicle(&id).unwrap().position;
        oracle.step(5.0);
        assert_eq!(oracle.vehicle(&id).unwrap().position, before);
        assert_eq!(oracle.vehicle(&id).unwrap().speed_kmh(), 0.0);
    }

    #[test]
    fn test_deterministic_telemetry() {
        let run = |seed| {
            let mut oracle = Oracle::new(ChaCha8Rng::seed_from_u64(seed));
            oracle.spawn_vehicle("a", square(Position::new(11.15, 7.65), 0.01), 40.0);
            oracle.step(1.0);
            oracle.generate_telemetry()
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn test_glitches_are_not_history() {
        let mut oracle = Oracle::new(ChaCha8Rng::seed_from_u64(3));
        oracle.set_glitch_rate(1.0);
        let id = oracle.spawn_vehicle("a", square(Position::new(11.15, 7.65), 0.01), 40.0);

        let batch = oracle.generate_telemetry();
        let lat = &batch[0].1["lat"];
        assert!(lat.is_null() || lat == "abc");
        assert_eq!(oracle.glitches(), 1);
        assert!(oracle.history(&id).is_empty());

        oracle.note_publish();
        assert!(oracle.history(&id).is_empty());
    }

    #[test]
    fn test_republish_repeats_last_valid_record() {
        let mut oracle = Oracle::new(ChaCha8Rng::seed_from_u64(3));
        let id = oracle.spawn_vehicle("a", square(Position::new(11.15, 7.65), 0.01), 40.0);
        oracle.generate_telemetry();
        oracle.note_publish();

        let history = oracle.history(&id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], history[1]);
    }

    #[test]
    fn test_expected_transitions() {
        let reference = AdminReference::new(11.1533, 7.6544, 10_000.0, 50.0);
        let mut oracle = Oracle::new(ChaCha8Rng::seed_from_u64(1));
        let id = VehicleId::from("a");
        oracle.history.insert(
            id.clone(),
            vec![
                Delivery { position: Position::new(11.1533, 7.6544), speed_kmh: 40.0 },
                Delivery { position: Position::new(11.30, 7.80), speed_kmh: 60.0 },
                Delivery { position: Position::new(11.31, 7.80), speed_kmh: 61.0 },
                Delivery { position: Position::new(11.1533, 7.6544), speed_kmh: 20.0 },
                Delivery { position: Position::new(11.1533, 7.6544), speed_kmh: 70.0 },
            ],
        );

        let expected = oracle.expected_transitions(&id, &reference);
        assert_eq!(
            expected,
            ExpectedTransitions { exits: 1, entries: 1, speed_alerts: 2 }
        );
    }
}
