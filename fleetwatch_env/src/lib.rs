//! FleetWatch Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the FleetWatch
//! engine to run against both a **Production** real-time store and a
//! **Simulation** store driven by a virtual clock.
//!
//! # Core Concept: The Reactor Pattern
//!
//! The engine never touches I/O directly. Everything it needs from the
//! outside world goes through two traits:
//! - Time (`now()`, `system_time()`, `sleep()`) via [`FleetContext`]
//! - The vehicle store (`next_snapshot()`, `write()`) via [`VehicleStore`]
//!
//! # Example
//!
//! ```ignore
//! use fleetwatch_env::{FleetContext, VehicleStore};
//!
//! async fn monitor_loop<Ctx: FleetContext, S: VehicleStore>(ctx: &Ctx, store: &S) {
//!     while let Some(envelope) = store.next_snapshot().await {
//!         handle_snapshot(envelope, ctx.system_time());
//!     }
//! }
//! ```

mod context;
mod store;
mod types;
mod error;
mod tokio_impl;

pub use context::FleetContext;
pub use store::{StoreController, VehicleStore};
pub use types::{SnapshotEnvelope, StoreWrite, VehicleId, VEHICLE_COLLECTION};
pub use error::StoreError;
pub use tokio_impl::TokioContext;
