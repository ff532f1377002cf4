//! FleetWatch Deterministic Simulation Harness
//!
//! This crate provides a controlled environment where the fleet monitor runs
//! against a simulated store, with every source of non-determinism pinned:
//! - **Time**: Virtual clock advanced one telemetry interval per tick
//! - **Store**: In-memory JSON tree with injectable write failures
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │                                                             │
//! │  ┌───────────┐  telemetry  ┌────────────────┐  snapshots    │
//! │  │  Oracle   │────────────►│ SimVehicleStore│──────────┐    │
//! │  │ (truth)   │◄────────────│  + controller  │◄──────┐  │    │
//! │  └───────────┘   control   └────────────────┘ writes│  ▼    │
//! │                                              ┌──────┴──────┐│
//! │                                              │FleetMonitor ││
//! │                                              │+ Dispatcher ││
//! │                                              └─────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleetwatch_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 4).run(ScenarioId::Breakout);
//! assert!(result.passed);
//! ```

mod context;
mod store;
mod oracle;
pub mod scenarios;
pub mod runner;
pub mod exporter;

pub use context::SimContext;
pub use store::{SimStoreController, SimVehicleStore};
pub use oracle::{Delivery, ExpectedTransitions, GroundTruthVehicle, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use exporter::{ExportError, ReportedState, SimEvent, SimExport, SimFrame, VehicleFrame};
