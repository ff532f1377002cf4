//! Real-time vehicle store abstraction.

use async_trait::async_trait;
use crate::error::StoreError;
use crate::types::{SnapshotEnvelope, StoreWrite};

/// Abstraction over the remote real-time data store holding the `vehicle`
/// collection.
///
/// # Implementations
///
/// - **Production**: a client for the hosted store (outside this workspace)
/// - **Simulation**: in-memory JSON tree with injectable write failures
///
/// # Data Flow
///
/// ```text
/// Store                           Monitor
///   |                                |
///   |-- next_snapshot() (full) ----->|-- reconcile()
///   |                                |
///   |<-- write(vehicle/{id}/..) -----|   (dispatcher, one-way)
/// ```
#[async_trait]
pub trait VehicleStore: Send + Sync + 'static {
    /// Receives the next full snapshot of the `vehicle` collection.
    ///
    /// Every change in the store yields the *entire* collection, never a
    /// diff. An empty collection arrives as `Value::Null`.
    ///
    /// # Returns
    /// * `Some(envelope)` - A snapshot was delivered
    /// * `None` - The subscription was closed (shutdown)
    async fn next_snapshot(&self) -> Option<SnapshotEnvelope>;

    /// Writes a value at a path relative to the store root.
    ///
    /// # Returns
    /// * `Ok(())` - The store acknowledged the write
    /// * `Err(StoreError)` - The write was rejected or the store is unreachable
    async fn write(&self, write: StoreWrite) -> Result<(), StoreError>;

    /// Returns the name of the subscribed collection.
    fn collection(&self) -> &str;
}

/// Marker trait for store controllers in simulation.
///
/// Allows injecting write faults.
pub trait StoreController: Send + Sync {
    /// Rejects every write whose path starts with `prefix`.
    fn fail_writes_under(&self, prefix: &str);

    /// Sets the probability (0.0 - 1.0) that any write is rejected.
    fn set_write_failure_rate(&self, rate: f64);

    /// Clears all injected faults.
    fn heal_all(&self);
}
