//! Monitor Runtime - drives the reconciler from a store subscription.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       FleetMonitor                         │
//! │                                                            │
//! │  VehicleStore ──next_snapshot()──► FleetTracker::apply     │
//! │       ▲                                   │                │
//! │       │                                   ▼                │
//! │  CommandDispatcher            mpsc::Sender<Reconciliation  │
//! │  (write, one-way)                          Event>          │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! One snapshot is reconciled to completion before the next is awaited, and
//! its events are forwarded only after that snapshot is fully applied.
//!
//! # Usage
//!
//! ```ignore
//! use fleetwatch_core::{FleetConfig, FleetMonitor};
//! use fleetwatch_env::TokioContext;
//!
//! let (mut monitor, mut events) = FleetMonitor::new(TokioContext::shared(), store, &FleetConfig::default())?;
//! tokio::spawn(async move { monitor.run().await });
//! while let Some(event) = events.recv().await {
//!     // redraw marker, table row, ...
//! }
//! ```

use fleetwatch_env::{FleetContext, SnapshotEnvelope, VehicleStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::fleet_commands::CommandDispatcher;
use crate::fleet_config::{ConfigError, FleetConfig};
use crate::fleet_record::Snapshot;
use crate::fleet_tracking::FleetTracker;
use crate::fleet_view::{Notification, ReconciliationEvent};

/// Subscribes to a [`VehicleStore`] and publishes reconciliation events.
///
/// Generic over the context and store implementations, so the same monitor
/// runs against a live store (tokio) or the simulated one.
pub struct FleetMonitor<Ctx, S>
where
    Ctx: FleetContext,
    S: VehicleStore,
{
    context: Arc<Ctx>,
    store: Arc<S>,
    tracker: FleetTracker,
    events_tx: mpsc::Sender<ReconciliationEvent>,
    last_sequence: Option<u64>,
    sink_closed: bool,
}

impl<Ctx, S> FleetMonitor<Ctx, S>
where
    Ctx: FleetContext,
    S: VehicleStore,
{
    /// Creates a monitor and the receiving end of its event channel.
    pub fn new(
        context: Arc<Ctx>,
        store: Arc<S>,
        config: &FleetConfig,
    ) -> Result<(Self, mpsc::Receiver<ReconciliationEvent>), ConfigError> {
        let tracker = FleetTracker::from_config(config)?;
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        debug!(
            seed = context.seed(),
            buffer = config.event_buffer,
            "Fleet monitor created"
        );

        let monitor = Self {
            context,
            store,
            tracker,
            events_tx,
            last_sequence: None,
            sink_closed: false,
        };
        Ok((monitor, events_rx))
    }

    /// A dispatcher writing to the same store.
    pub fn dispatcher(&self) -> CommandDispatcher<Ctx, S> {
        CommandDispatcher::new(Arc::clone(&self.context), Arc::clone(&self.store))
    }

    pub fn tracker(&self) -> &FleetTracker {
        &self.tracker
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Reconciles one envelope and returns its events without forwarding them.
    ///
    /// Envelopes are applied in the order given, even when the sequence number
    /// goes backwards.
    pub fn process_snapshot(&mut self, envelope: &SnapshotEnvelope) -> Vec<ReconciliationEvent> {
        if let Some(last) = self.last_sequence {
            if envelope.sequence <= last {
                warn!(
                    sequence = envelope.sequence,
                    last, "Snapshot sequence did not advance"
                );
            }
        }
        self.last_sequence = Some(envelope.sequence);

        let snapshot = Snapshot::from_envelope(envelope);
        let events = self.tracker.apply(&snapshot);

        debug!(
            sequence = envelope.sequence,
            records = snapshot.len(),
            events = events.len(),
            at_ms = self.context.now().as_millis() as u64,
            "Reconciled snapshot"
        );

        for event in &events {
            debug!(vehicle = %event.vehicle_id(), kind = event.kind.name(), "Vehicle event");
        }
        for notice in events.iter().filter_map(Notification::from_event) {
            info!(vehicle = %notice.vehicle_id, severity = ?notice.severity, "{}", notice.message);
        }

        events
    }

    /// Awaits the next snapshot, reconciles it and forwards its events.
    ///
    /// Returns the number of events produced, or `None` once the store
    /// subscription has ended.
    pub async fn step(&mut self) -> Option<usize> {
        let envelope = self.store.next_snapshot().await?;
        let events = self.process_snapshot(&envelope);
        let count = events.len();
        self.forward(events).await;
        Some(count)
    }

    /// Processes snapshots until the subscription ends. Returns the number of
    /// snapshots processed.
    pub async fn run(&mut self) -> u64 {
        let mut processed = 0;
        while self.step().await.is_some() {
            processed += 1;
        }
        info!(
            snapshots = processed,
            vehicles = self.tracker.state().len(),
            "Store subscription ended"
        );
        processed
    }

    async fn forward(&mut self, events: Vec<ReconciliationEvent>) {
        if self.sink_closed {
            return;
        }
        for event in events {
            if self.events_tx.send(event).await.is_err() {
                // Keep reconciling so state stays current for views and lookups
                warn!("Event receiver dropped, no longer forwarding events");
                self.sink_closed = true;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet_view::EventKind;
    use async_trait::async_trait;
    use fleetwatch_env::{StoreError, StoreWrite, TokioContext, VehicleId};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of envelopes, then ends the subscription.
    #[derive(Default)]
    struct ReplayStore {
        pending: Mutex<VecDeque<SnapshotEnvelope>>,
        writes: Mutex<Vec<StoreWrite>>,
    }

    impl ReplayStore {
        fn with(values: Vec<serde_json::Value>) -> Arc<Self> {
            let pending = values
                .into_iter()
                .enumerate()
                .map(|(i, value)| SnapshotEnvelope::new(i as u64, value, 0))
                .collect();
            Arc::new(Self {
                pending: Mutex::new(pending),
                writes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VehicleStore for ReplayStore {
        async fn next_snapshot(&self) -> Option<SnapshotEnvelope> {
            self.pending.lock().unwrap().pop_front()
        }

        async fn write(&self, write: StoreWrite) -> Result<(), StoreError> {
            self.writes.lock().unwrap().push(write);
            Ok(())
        }

        fn collection(&self) -> &str {
            "vehicle"
        }
    }

    fn zaria_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.reference.center_lat = 11.1533;
        config.reference.center_lng = 7.6544;
        config
    }

    #[tokio::test]
    async fn test_run_forwards_events_in_order() {
        let store = ReplayStore::with(vec![
            json!({ "1": { "lat": 11.1533, "lng": 7.6544, "speed": 40 } }),
            json!({ "1": { "lat": 11.30, "lng": 7.80, "speed": 40 } }),
            serde_json::Value::Null,
        ]);
        let (mut monitor, mut events) =
            FleetMonitor::new(TokioContext::shared(), store, &zaria_config()).unwrap();

        assert_eq!(monitor.run().await, 3);
        assert_eq!(monitor.last_sequence(), Some(2));

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![EventKind::Created, EventKind::Updated, EventKind::GeofenceExited]
        );
        assert_eq!(monitor.tracker().stats().empty_snapshots, 1);
    }

    #[tokio::test]
    async fn test_step_returns_none_when_subscription_ends() {
        let store = ReplayStore::with(vec![json!({ "a": { "lat": "abc", "lng": 7.0 } })]);
        let (mut monitor, _events) =
            FleetMonitor::new(TokioContext::shared(), store, &zaria_config()).unwrap();

        assert_eq!(monitor.step().await, Some(0));
        assert_eq!(monitor.step().await, None);
        assert!(monitor.tracker().state().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_receiver_keeps_reconciling() {
        let store = ReplayStore::with(vec![
            json!({ "1": { "lat": 11.1533, "lng": 7.6544 } }),
            json!({ "1": { "lat": 11.1534, "lng": 7.6544 } }),
        ]);
        let (mut monitor, events) =
            FleetMonitor::new(TokioContext::shared(), store, &zaria_config()).unwrap();
        drop(events);

        assert_eq!(monitor.run().await, 2);
        let vehicle = monitor.tracker().state().get(&VehicleId::from("1")).unwrap();
        assert_eq!(vehicle.trail().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatcher_shares_store() {
        let store = ReplayStore::with(Vec::new());
        let (monitor, _events) =
            FleetMonitor::new(TokioContext::shared(), store.clone(), &zaria_config()).unwrap();

        monitor.dispatcher().override_on(&VehicleId::from("veh1")).await.unwrap();
        assert_eq!(store.writes.lock().unwrap()[0].path, "vehicle/veh1/override");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = zaria_config();
        config.event_buffer = 0;
        let result = FleetMonitor::new(TokioContext::shared(), ReplayStore::with(Vec::new()), &config);
        assert!(matches!(result, Err(ConfigError::ZeroEventBuffer)));
    }
}
