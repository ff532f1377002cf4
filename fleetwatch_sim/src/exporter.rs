//! JSON exporter for replaying a run on a map.
//!
//! Exports periodic frames (ground truth next to the reconciled view) plus
//! the final trail of every vehicle.

use fleetwatch_core::{EngineStatus, GeofenceStatus, OverrideStatus, Position, VehicleView};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::oracle::GroundTruthVehicle;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode export: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    pub vehicles: Vec<VehicleFrame>,

    /// Operator notifications and command outcomes since the last frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// One vehicle in a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleFrame {
    pub id: String,
    pub truth: Position,

    /// Reconciled state; absent until the first valid record arrives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported: Option<ReportedState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedState {
    pub position: Position,
    pub color: String,
    pub distance_m: f64,
    pub status: GeofenceStatus,
    pub speed_kmh: f64,
    pub override_status: OverrideStatus,
    pub engine_status: EngineStatus,
}

impl VehicleFrame {
    pub fn new(truth: &GroundTruthVehicle, view: Option<&VehicleView>) -> Self {
        Self {
            id: truth.id.to_string(),
            truth: truth.position,
            reported: view.map(|view| ReportedState {
                position: view.position,
                color: view.color.clone(),
                distance_m: view.distance_m,
                status: view.status,
                speed_kmh: view.speed_kmh,
                override_status: view.override_status,
                engine_status: view.engine_status,
            }),
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,
    pub duration_sec: f64,
    pub frames: Vec<SimFrame>,

    /// Final trail per vehicle, oldest point first
    pub trails: BTreeMap<String, Vec<Position>>,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            trails: BTreeMap::new(),
            passed: false,
            failure_reason: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Record final trails and the verdict.
    pub fn finalize<'a>(
        &mut self,
        views: impl IntoIterator<Item = &'a VehicleView>,
        passed: bool,
        failure_reason: Option<String>,
    ) {
        self.trails = views
            .into_iter()
            .map(|view| (view.id.to_string(), view.trail.to_vec()))
            .collect();
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_env::VehicleId;
    use std::sync::Arc;

    fn view(id: &str) -> VehicleView {
        VehicleView {
            id: VehicleId::from(id),
            position: Position::new(11.15, 7.65),
            trail: Arc::new(vec![Position::new(11.14, 7.65), Position::new(11.15, 7.65)]),
            color: "blue".to_string(),
            distance_m: 120.0,
            status: GeofenceStatus::Inside,
            speed_kmh: 32.0,
            override_status: OverrideStatus::Off,
            engine_status: EngineStatus::Running,
        }
    }

    #[test]
    fn test_export_json_shape() {
        let mut export = SimExport::new("patrol", 42);
        export.add_frame(SimFrame {
            time_sec: 1.5,
            vehicles: Vec::new(),
            events: Vec::new(),
        });
        export.finalize([view("a")].iter(), true, None);

        let json: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        assert_eq!(json["scenario"], "patrol");
        assert_eq!(json["duration_sec"], 1.5);
        assert_eq!(json["trails"]["a"].as_array().unwrap().len(), 2);
        assert!(json["frames"][0].get("events").is_none());
        assert!(json.get("failure_reason").is_none());
    }
}
