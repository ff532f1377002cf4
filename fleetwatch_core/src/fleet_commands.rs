//! Outbound remote-control commands.
//!
//! Four commands are written back to the store, each addressed by a path
//! built from the vehicle id:
//!
//! | Command       | Path                     | Value                                   |
//! |---------------|--------------------------|-----------------------------------------|
//! | shut off      | `vehicle/{id}/control`   | `{ command: "SHUT_OFF", timestamp }`    |
//! | restore       | `vehicle/{id}/control`   | `{ command: "RESTORE", timestamp }`     |
//! | override on   | `vehicle/{id}/override`  | `true`                                  |
//! | override off  | `vehicle/{id}/override`  | `false`                                 |
//!
//! The `build_*` functions are pure payload constructors. [`CommandDispatcher`]
//! hands payloads to a [`VehicleStore`] and reports failures with the payload
//! still attached, so the caller decides whether to retry.

use chrono::{DateTime, SecondsFormat, Utc};
use fleetwatch_env::{FleetContext, StoreError, StoreWrite, VehicleId, VehicleStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fleet_record::ControlCommand;

/// A write ready to be sent to the store.
pub type CommandPayload = StoreWrite;

const CONTROL_CHILD: &str = "control";
const OVERRIDE_CHILD: &str = "override";

/// Dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Vehicle id {0:?} cannot be used as a store path segment")]
    InvalidVehicleId(VehicleId),

    #[error("Write to {} failed: {}", .payload.path, .source)]
    WriteFailed {
        payload: CommandPayload,
        source: StoreError,
    },
}

impl DispatchError {
    /// The payload that failed to send, if one was built.
    pub fn payload(&self) -> Option<&CommandPayload> {
        match self {
            DispatchError::InvalidVehicleId(_) => None,
            DispatchError::WriteFailed { payload, .. } => Some(payload),
        }
    }
}

// ============================================================================
// PAYLOAD BUILDERS
// ============================================================================

/// ISO-8601 UTC timestamp with millisecond precision (`2024-01-01T00:00:00.000Z`).
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn control_payload(id: &VehicleId, command: ControlCommand, now: DateTime<Utc>) -> CommandPayload {
    StoreWrite::new(
        id.child_path(CONTROL_CHILD),
        json!({
            "command": command.as_wire(),
            "timestamp": iso_timestamp(now),
        }),
    )
}

pub fn build_shut_off(id: &VehicleId, now: DateTime<Utc>) -> CommandPayload {
    control_payload(id, ControlCommand::ShutOff, now)
}

pub fn build_restore(id: &VehicleId, now: DateTime<Utc>) -> CommandPayload {
    control_payload(id, ControlCommand::Restore, now)
}

pub fn build_override_on(id: &VehicleId) -> CommandPayload {
    StoreWrite::new(id.child_path(OVERRIDE_CHILD), Value::Bool(true))
}

pub fn build_override_off(id: &VehicleId) -> CommandPayload {
    StoreWrite::new(id.child_path(OVERRIDE_CHILD), Value::Bool(false))
}

// ============================================================================
// COMMANDS
// ============================================================================

/// The four operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleCommand {
    ShutOff,
    Restore,
    OverrideOn,
    OverrideOff,
}

impl VehicleCommand {
    pub fn all() -> [VehicleCommand; 4] {
        [
            VehicleCommand::ShutOff,
            VehicleCommand::Restore,
            VehicleCommand::OverrideOn,
            VehicleCommand::OverrideOff,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            VehicleCommand::ShutOff => "shut_off",
            VehicleCommand::Restore => "restore",
            VehicleCommand::OverrideOn => "override_on",
            VehicleCommand::OverrideOff => "override_off",
        }
    }

    /// Build the store payload for this command.
    pub fn build(&self, id: &VehicleId, now: DateTime<Utc>) -> CommandPayload {
        match self {
            VehicleCommand::ShutOff => build_shut_off(id, now),
            VehicleCommand::Restore => build_restore(id, now),
            VehicleCommand::OverrideOn => build_override_on(id),
            VehicleCommand::OverrideOff => build_override_off(id),
        }
    }

    /// Operator acknowledgement once the store accepted the write.
    pub fn acknowledgement(&self, id: &VehicleId) -> String {
        match self {
            VehicleCommand::ShutOff => format!("Shutdown sent to Vehicle {}", id),
            VehicleCommand::Restore => format!("Restore sent to Vehicle {}", id),
            VehicleCommand::OverrideOn => format!("Override ENABLED for Vehicle {}", id),
            VehicleCommand::OverrideOff => format!("Override DISABLED for Vehicle {}", id),
        }
    }
}

impl std::fmt::Display for VehicleCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for VehicleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shut_off" | "shutoff" | "shutdown" => Ok(VehicleCommand::ShutOff),
            "restore" => Ok(VehicleCommand::Restore),
            "override_on" | "overrideon" => Ok(VehicleCommand::OverrideOn),
            "override_off" | "overrideoff" => Ok(VehicleCommand::OverrideOff),
            _ => Err(format!("Unknown command: {}", s)),
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Result of a command the store accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReceipt {
    pub vehicle_id: VehicleId,
    pub command: VehicleCommand,
    pub payload: CommandPayload,
    pub message: String,
}

/// Sends commands to the store.
///
/// Holds no reconciliation state; clones share the same store and clock, and
/// any number of dispatches may be in flight at once.
pub struct CommandDispatcher<Ctx, S>
where
    Ctx: FleetContext,
    S: VehicleStore,
{
    context: Arc<Ctx>,
    store: Arc<S>,
}

impl<Ctx, S> Clone for CommandDispatcher<Ctx, S>
where
    Ctx: FleetContext,
    S: VehicleStore,
{
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            store: Arc::clone(&self.store),
        }
    }
}

impl<Ctx, S> CommandDispatcher<Ctx, S>
where
    Ctx: FleetContext,
    S: VehicleStore,
{
    pub fn new(context: Arc<Ctx>, store: Arc<S>) -> Self {
        Self { context, store }
    }

    /// Build and send `command` for vehicle `id`.
    ///
    /// # Errors
    /// * `InvalidVehicleId` - the id cannot form a store path
    /// * `WriteFailed` - the store rejected the write; the payload is returned
    ///   for the caller to retry with [`CommandDispatcher::resend`]
    pub async fn dispatch(
        &self,
        id: &VehicleId,
        command: VehicleCommand,
    ) -> Result<CommandReceipt, DispatchError> {
        if !id.is_path_safe() {
            return Err(DispatchError::InvalidVehicleId(id.clone()));
        }

        let now: DateTime<Utc> = self.context.system_time().into();
        let payload = command.build(id, now);
        self.send(&payload).await?;

        let message = command.acknowledgement(id);
        info!(vehicle = %id, command = %command, "{}", message);

        Ok(CommandReceipt {
            vehicle_id: id.clone(),
            command,
            payload,
            message,
        })
    }

    /// Send a previously built payload again, unchanged.
    pub async fn resend(&self, payload: &CommandPayload) -> Result<(), DispatchError> {
        self.send(payload).await
    }

    pub async fn shut_off(&self, id: &VehicleId) -> Result<CommandReceipt, DispatchError> {
        self.dispatch(id, VehicleCommand::ShutOff).await
    }

    pub async fn restore(&self, id: &VehicleId) -> Result<CommandReceipt, DispatchError> {
        self.dispatch(id, VehicleCommand::Restore).await
    }

    pub async fn override_on(&self, id: &VehicleId) -> Result<CommandReceipt, DispatchError> {
        self.dispatch(id, VehicleCommand::OverrideOn).await
    }

    pub async fn override_off(&self, id: &VehicleId) -> Result<CommandReceipt, DispatchError> {
        self.dispatch(id, VehicleCommand::OverrideOff).await
    }

    async fn send(&self, payload: &CommandPayload) -> Result<(), DispatchError> {
        debug!(path = %payload.path, "Writing command payload");
        self.store.write(payload.clone()).await.map_err(|source| {
            warn!(path = %payload.path, error = %source, "Command write failed");
            DispatchError::WriteFailed {
                payload: payload.clone(),
                source,
            }
        })
    }
}
