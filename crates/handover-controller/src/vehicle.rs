//! Vehicle control over NATS request/reply.
//!
//! The simulator side runs a small bridge that owns the ego vehicle and the
//! traffic manager. Every call is a request on `<prefix>.<leaf>` with a JSON
//! body; the bridge answers with a JSON object, or `{"error": "..."}`.
//!
//! | Leaf               | Body                                   | Reply                 |
//! |--------------------|----------------------------------------|-----------------------|
//! | `autopilot`        | `{"enabled", "traffic_manager_port"}`  | `{}`                  |
//! | `lane_change`      | `{"enabled"}`                          | `{}`                  |
//! | `speed_difference` | `{"percent"}`                          | `{}`                  |
//! | `ignore_vehicles`  | `{"percent"}`                          | `{}`                  |
//! | `speed_limit`      | `{}`                                   | `{"speed_limit_kmh"}` |
//! | `telemetry`        | `{}`                                   | `VehicleTelemetry`    |
//! | `reload_world`     | `{}`                                   | `{}`                  |

use std::time::Duration;

use handover_core::collaborators::{CollaboratorError, VehicleControl};
use handover_core::config::TransportConfig;
use handover_types::VehicleTelemetry;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::debug;

use crate::nats::{block_on, millis};

#[derive(Debug, Serialize)]
struct AutopilotCommand {
    enabled: bool,
    traffic_manager_port: u16,
}

#[derive(Debug, Serialize)]
struct ToggleCommand {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct PercentCommand {
    percent: f64,
}

#[derive(Debug, Serialize)]
struct EmptyCommand {}

#[derive(Debug, Deserialize)]
struct SpeedLimitReply {
    speed_limit_kmh: f64,
}

/// Bridge answer: an error object or the expected payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reply<T> {
    Error { error: String },
    Value(T),
}

/// Decode a bridge reply for `operation`.
fn decode_reply<T: DeserializeOwned>(operation: &str, payload: &[u8]) -> Result<T, CollaboratorError> {
    let failed = |message: String| CollaboratorError::Failed {
        operation: operation.to_owned(),
        message,
    };
    match serde_json::from_slice::<Reply<T>>(payload) {
        Ok(Reply::Value(value)) => Ok(value),
        Ok(Reply::Error { error }) => Err(failed(error)),
        Err(e) => Err(failed(format!("unreadable reply: {e}"))),
    }
}

/// The ego vehicle behind the simulator's control bridge.
pub struct NatsVehicle {
    client: async_nats::Client,
    transport: TransportConfig,
    timeout: Duration,
    handle: Handle,
}

impl NatsVehicle {
    /// A control surface using `transport`'s subject prefix; every request
    /// fails after `timeout`.
    pub fn new(client: async_nats::Client, transport: &TransportConfig, timeout: Duration) -> Self {
        Self {
            client,
            transport: transport.clone(),
            timeout,
            handle: Handle::current(),
        }
    }

    async fn request_async<T, B>(&self, leaf: &str, body: &B) -> Result<T, CollaboratorError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let subject = self.transport.vehicle_subject(leaf);
        let payload = serde_json::to_vec(body).map_err(|e| CollaboratorError::Failed {
            operation: subject.clone(),
            message: e.to_string(),
        })?;

        let reply = match tokio::time::timeout(
            self.timeout,
            self.client.request(subject.clone(), payload.into()),
        )
        .await
        {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                return Err(CollaboratorError::Failed {
                    operation: subject,
                    message: e.to_string(),
                });
            }
            Err(_elapsed) => {
                return Err(CollaboratorError::Timeout {
                    operation: subject,
                    timeout_ms: millis(self.timeout),
                });
            }
        };

        debug!(subject = %subject, bytes = reply.payload.len(), "Control reply");
        decode_reply(&subject, &reply.payload)
    }

    fn request<T, B>(&self, leaf: &str, body: &B) -> Result<T, CollaboratorError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        block_on(&self.handle, self.request_async(leaf, body))
    }

    fn command<B: Serialize + Sync>(&self, leaf: &str, body: &B) -> Result<(), CollaboratorError> {
        self.request::<IgnoredAny, B>(leaf, body).map(|_| ())
    }

    /// Ask the simulator to reload the current world so it re-reads the
    /// experiment file.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the bridge does not confirm in time.
    pub async fn reload_world(&self) -> Result<(), CollaboratorError> {
        self.request_async::<IgnoredAny, _>("reload_world", &EmptyCommand {})
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for NatsVehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsVehicle")
            .field("prefix", &self.transport.vehicle_subject_prefix)
            .field("timeout_ms", &self.timeout.as_millis())
            .finish_non_exhaustive()
    }
}

impl VehicleControl for NatsVehicle {
    fn set_autopilot(&mut self, enabled: bool, profile: u16) -> Result<(), CollaboratorError> {
        self.command(
            "autopilot",
            &AutopilotCommand {
                enabled,
                traffic_manager_port: profile,
            },
        )
    }

    fn set_lane_change_enabled(&mut self, enabled: bool) -> Result<(), CollaboratorError> {
        self.command("lane_change", &ToggleCommand { enabled })
    }

    fn set_speed_difference_percent(&mut self, percent: f64) -> Result<(), CollaboratorError> {
        self.command("speed_difference", &PercentCommand { percent })
    }

    fn set_collision_avoidance_ignore_percent(&mut self, percent: f64) -> Result<(), CollaboratorError> {
        self.command("ignore_vehicles", &PercentCommand { percent })
    }

    fn speed_limit(&mut self) -> Result<f64, CollaboratorError> {
        self.request::<SpeedLimitReply, _>("speed_limit", &EmptyCommand {})
            .map(|reply| reply.speed_limit_kmh)
    }

    fn telemetry(&mut self) -> Result<VehicleTelemetry, CollaboratorError> {
        self.request("telemetry", &EmptyCommand {})
    }
}
