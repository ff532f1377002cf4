//! Simulated realtime store with fault injection.
//!
//! Holds the whole database as one JSON tree. Every mutation (telemetry push
//! or command write) republishes the full `vehicle` collection to the
//! subscriber, the way the hosted store notifies value listeners.

use async_trait::async_trait;
use fleetwatch_env::{
    FleetContext, SnapshotEnvelope, StoreController, StoreError, StoreWrite, VehicleId,
    VehicleStore, VEHICLE_COLLECTION,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::context::SimContext;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store backing the simulated fleet.
pub struct SimVehicleStore {
    context: Arc<SimContext>,
    controller: Arc<SimStoreController>,

    /// Root of the database
    tree: Mutex<Value>,

    /// Publishing side of the subscription; `None` once closed
    tx: Mutex<Option<mpsc::UnboundedSender<SnapshotEnvelope>>>,

    /// Receiving side (behind tokio mutex for async)
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SnapshotEnvelope>>,

    sequence: AtomicU64,
    pending: AtomicUsize,

    /// Command writes the store accepted, in order
    accepted: Mutex<Vec<StoreWrite>>,
}

impl SimVehicleStore {
    pub fn new(context: Arc<SimContext>, controller: Arc<SimStoreController>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            context,
            controller,
            tree: Mutex::new(Value::Object(Map::new())),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            sequence: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }

    pub fn controller(&self) -> &Arc<SimStoreController> {
        &self.controller
    }

    /// Merge telemetry fields into one vehicle and publish.
    pub fn push_telemetry(&self, id: &VehicleId, fields: Value) {
        self.push_telemetry_batch(vec![(id.clone(), fields)]);
    }

    /// Merge telemetry for several vehicles, then publish a single snapshot.
    ///
    /// Object fields are merged key by key; a `null` field deletes that key.
    pub fn push_telemetry_batch(&self, batch: Vec<(VehicleId, Value)>) {
        {
            let mut tree = lock(&self.tree);
            for (id, fields) in batch {
                let path = format!("{}/{}", VEHICLE_COLLECTION, id);
                match fields {
                    Value::Object(map) => {
                        for (key, value) in map {
                            let field = StoreWrite::new(format!("{}/{}", path, key), value);
                            set_in_tree(&mut tree, field);
                        }
                    }
                    other => set_in_tree(&mut tree, StoreWrite::new(path, other)),
                }
            }
        }
        self.publish();
    }

    /// Set (or, with `null`, delete) the value at `path` and publish.
    ///
    /// Bypasses fault injection; used to seed the database.
    pub fn set_at_path(&self, path: &str, value: Value) {
        set_in_tree(&mut lock(&self.tree), StoreWrite::new(path, value));
        self.publish();
    }

    /// Current value at `path`, if any.
    pub fn read(&self, path: &str) -> Option<Value> {
        let tree = lock(&self.tree);
        let mut node = &*tree;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.as_object()?.get(segment)?;
        }
        Some(node.clone())
    }

    /// End the subscription once the queued snapshots are consumed.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    /// Snapshots published but not yet consumed.
    pub fn pending_snapshots(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn accepted_writes(&self) -> Vec<StoreWrite> {
        lock(&self.accepted).clone()
    }

    fn publish(&self) {
        let value = self.read(VEHICLE_COLLECTION).unwrap_or(Value::Null);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope =
            SnapshotEnvelope::new(sequence, value, self.context.now().as_millis() as u64);

        if let Some(tx) = lock(&self.tx).as_ref() {
            if tx.send(envelope).is_ok() {
                self.pending.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl VehicleStore for SimVehicleStore {
    async fn next_snapshot(&self) -> Option<SnapshotEnvelope> {
        let envelope = self.rx.lock().await.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(envelope)
    }

    async fn write(&self, write: StoreWrite) -> Result<(), StoreError> {
        self.controller.check_write(&write.path)?;

        set_in_tree(&mut lock(&self.tree), write.clone());
        lock(&self.accepted).push(write);
        self.publish();
        Ok(())
    }

    fn collection(&self) -> &str {
        VEHICLE_COLLECTION
    }
}

/// Apply one write, creating objects along its path.
///
/// A `null` value removes the leaf, matching the store's "null deletes" rule.
fn set_in_tree(root: &mut Value, mut write: StoreWrite) {
    let value = std::mem::take(&mut write.value);
    let segments: Vec<&str> = write.segments().collect();
    let Some((leaf, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.remove(*leaf);
        } else {
            map.insert(leaf.to_string(), value);
        }
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Store controller for fault injection on writes.
pub struct SimStoreController {
    /// Paths under these prefixes are rejected
    failing_prefixes: Mutex<Vec<String>>,

    /// Probability (0.0 - 1.0) that any other write is rejected
    failure_rate: Mutex<f64>,

    rng: Mutex<ChaCha8Rng>,
}

impl SimStoreController {
    /// Controller drawing fault decisions from `rng`.
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            failing_prefixes: Mutex::new(Vec::new()),
            failure_rate: Mutex::new(0.0),
            rng: Mutex::new(rng),
        }
    }

    /// Decide whether a write to `path` goes through.
    pub fn check_write(&self, path: &str) -> Result<(), StoreError> {
        if lock(&self.failing_prefixes)
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Err(StoreError::rejected(format!("permission denied: {}", path)));
        }

        let rate = *lock(&self.failure_rate);
        if rate > 0.0 && lock(&self.rng).gen::<f64>() < rate {
            return Err(StoreError::unavailable("uplink dropped the write"));
        }
        Ok(())
    }

    pub fn failure_rate(&self) -> f64 {
        *lock(&self.failure_rate)
    }
}

impl StoreController for SimStoreController {
    fn fail_writes_under(&self, prefix: &str) {
        lock(&self.failing_prefixes).push(prefix.to_string());
    }

    fn set_write_failure_rate(&self, rate: f64) {
        *lock(&self.failure_rate) = rate.clamp(0.0, 1.0);
    }

    fn heal_all(&self) {
        lock(&self.failing_prefixes).clear();
        *lock(&self.failure_rate) = 0.0;
    }
}
