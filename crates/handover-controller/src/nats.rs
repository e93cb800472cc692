//! NATS-backed status channels, frame signal, eye samples and snapshots.
//!
//! # Subject Convention
//!
//! - **Simulator status:** `trial.status.simulator`
//! - **Scenario status:** `trial.status.scenario`
//! - **Controller status:** `trial.status.controller`
//! - **Frame signal:** `trial.sim.frame`
//! - **Eye samples:** `trial.eye.samples`
//! - **Snapshots:** `trial.status.snapshot`
//!
//! Names come from the `transport` section of the configuration.
//!
//! # Conflation
//!
//! Each subscription is drained by a background task into a [`conflating`]
//! channel. The tick loop only ever sees the newest payload; anything older
//! is evicted before it is read. When the server ends the subscription the
//! drain task drops its sender and the channel reports itself closed.
//! Dropping the subscription aborts the drain task, which unsubscribes.
//!
//! # Sync/Async Bridge
//!
//! The collaborator traits are synchronous while NATS is async. Publishing
//! goes through [`block_on`], which hands the current thread to the blocking
//! pool before entering the runtime.

use std::future::Future;
use std::time::Duration;

use crossbeam_channel::RecvError;
use futures::{Stream, StreamExt as _};
use handover_core::channel::{ChannelError, LatestReceiver, StatusPublisher, StatusSubscriber, conflating};
use handover_core::collaborators::{CollaboratorError, EyeTracker, FrameSource};
use handover_core::runner::TickCallback;
use handover_core::tick::TickSummary;
use handover_types::{EyeSample, Origin, StatusMessage, TrialSnapshot};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::ControllerError;

/// Run `future` to completion from synchronous code inside the runtime.
pub fn block_on<F: Future>(handle: &Handle, future: F) -> F::Output {
    tokio::task::block_in_place(|| handle.block_on(future))
}

/// Milliseconds in `duration`, saturating.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A subscription whose newest payload waits in a conflating channel.
#[derive(Debug)]
struct LatestSubscription {
    subject: String,
    latest: LatestReceiver<Vec<u8>>,
    drain: Option<AbortHandle>,
}

impl LatestSubscription {
    /// Subscribe to `subject` and start draining it in the background.
    async fn start(client: &async_nats::Client, subject: &str) -> Result<Self, ControllerError> {
        let subscriber = client
            .subscribe(subject.to_owned())
            .await
            .map_err(|e| ControllerError::Nats {
                message: format!("failed to subscribe to {subject}: {e}"),
            })?;
        Ok(Self::drain(subject, subscriber.map(|msg| msg.payload.to_vec())))
    }

    /// Drain `payloads` into a fresh conflating channel on the runtime.
    fn drain<S>(subject: &str, payloads: S) -> Self
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        let (tx, latest) = conflating();
        let name = subject.to_owned();
        let task = tokio::spawn(async move {
            let mut payloads = std::pin::pin!(payloads);
            while let Some(payload) = payloads.next().await {
                tx.post(payload);
            }
            debug!(subject = %name, "Subscription ended");
        });
        Self {
            subject: subject.to_owned(),
            latest,
            drain: Some(task.abort_handle()),
        }
    }

    /// The newest payload, waiting up to `wait`. `Err` once the drain ended.
    fn take(&self, wait: Duration) -> Result<Option<Vec<u8>>, RecvError> {
        self.latest.recv_latest(wait)
    }
}

impl Drop for LatestSubscription {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
            debug!(subject = %self.subject, "Subscription dropped");
        }
    }
}

// -----------------------------------------------------------------------
// Status channels
// -----------------------------------------------------------------------

/// Conflating subscriber for an upstream status subject.
#[derive(Debug)]
pub struct NatsStatusSubscriber {
    origin: Origin,
    latest: LatestSubscription,
}

impl NatsStatusSubscriber {
    /// Subscribe to `subject`, on which `origin` publishes.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Nats`] if the subscription fails.
    pub async fn subscribe(
        client: &async_nats::Client,
        subject: &str,
        origin: Origin,
    ) -> Result<Self, ControllerError> {
        Ok(Self {
            origin,
            latest: LatestSubscription::start(client, subject).await?,
        })
    }
}

impl StatusSubscriber for NatsStatusSubscriber {
    fn try_receive_latest(&mut self, wait: Duration) -> Result<Option<StatusMessage>, ChannelError> {
        let channel = || self.latest.subject.clone();
        let Some(payload) = self
            .latest
            .take(wait)
            .map_err(|_closed| ChannelError::Closed { channel: channel() })?
        else {
            return Ok(None);
        };
        StatusMessage::from_json(self.origin, &payload)
            .map(Some)
            .map_err(|source| ChannelError::Malformed {
                channel: channel(),
                source,
            })
    }
}

/// Publisher for the controller status subject.
pub struct NatsStatusPublisher {
    client: async_nats::Client,
    subject: String,
    handle: Handle,
}

impl NatsStatusPublisher {
    /// A publisher on `subject`, bridged through the current runtime.
    pub fn new(client: async_nats::Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_owned(),
            handle: Handle::current(),
        }
    }
}

impl std::fmt::Debug for NatsStatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsStatusPublisher")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl StatusPublisher for NatsStatusPublisher {
    fn publish(&mut self, message: &StatusMessage) -> Result<(), ChannelError> {
        let transport_error = |message: String| ChannelError::Transport {
            channel: self.subject.clone(),
            message,
        };
        let payload = serde_json::to_vec(message).map_err(|e| transport_error(e.to_string()))?;
        block_on(
            &self.handle,
            self.client.publish(self.subject.clone(), payload.into()),
        )
        .map_err(|e| transport_error(e.to_string()))
    }
}

// -----------------------------------------------------------------------
// Frame signal and eye samples
// -----------------------------------------------------------------------

/// Paces the tick loop on the simulator's frame subject.
#[derive(Debug)]
pub struct NatsFrameSource {
    latest: LatestSubscription,
    timeout: Duration,
}

impl NatsFrameSource {
    /// Subscribe to `subject`; a frame wait fails after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Nats`] if the subscription fails.
    pub async fn subscribe(
        client: &async_nats::Client,
        subject: &str,
        timeout: Duration,
    ) -> Result<Self, ControllerError> {
        Ok(Self {
            latest: LatestSubscription::start(client, subject).await?,
            timeout,
        })
    }
}

impl FrameSource for NatsFrameSource {
    fn wait_for_frame(&mut self) -> Result<(), CollaboratorError> {
        match self.latest.take(self.timeout) {
            Ok(Some(_frame)) => Ok(()),
            Ok(None) => Err(CollaboratorError::Timeout {
                operation: format!("frame wait on {}", self.latest.subject),
                timeout_ms: millis(self.timeout),
            }),
            Err(_closed) => Err(CollaboratorError::Closed {
                what: self.latest.subject.clone(),
            }),
        }
    }
}

/// Eye-tracker bridge: JSON [`EyeSample`]s on a subject.
#[derive(Debug)]
pub struct NatsEyeTracker {
    latest: LatestSubscription,
}

impl NatsEyeTracker {
    /// Subscribe to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Nats`] if the subscription fails.
    pub async fn subscribe(client: &async_nats::Client, subject: &str) -> Result<Self, ControllerError> {
        Ok(Self {
            latest: LatestSubscription::start(client, subject).await?,
        })
    }
}

impl EyeTracker for NatsEyeTracker {
    fn next_sample(&mut self) -> Result<Option<EyeSample>, CollaboratorError> {
        let Some(payload) = self
            .latest
            .take(Duration::ZERO)
            .map_err(|_closed| CollaboratorError::Closed {
                what: self.latest.subject.clone(),
            })?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| CollaboratorError::Failed {
                operation: format!("eye sample decode on {}", self.latest.subject),
                message: e.to_string(),
            })
    }
}

// -----------------------------------------------------------------------
// Snapshots
// -----------------------------------------------------------------------

/// Tick callback that publishes each [`TrialSnapshot`] for monitoring.
pub struct SnapshotPublisher {
    client: async_nats::Client,
    subject: String,
    handle: Handle,
}

impl SnapshotPublisher {
    /// A publisher on `subject`, bridged through the current runtime.
    pub fn new(client: async_nats::Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_owned(),
            handle: Handle::current(),
        }
    }
}

impl std::fmt::Debug for SnapshotPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPublisher")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl TickCallback for SnapshotPublisher {
    fn on_tick(&mut self, summary: &TickSummary, snapshot: &TrialSnapshot) -> Result<(), CollaboratorError> {
        if !summary.polled {
            return Ok(());
        }
        let failed = |message: String| CollaboratorError::Failed {
            operation: format!("snapshot publish on {}", self.subject),
            message,
        };
        let payload = serde_json::to_vec(snapshot).map_err(|e| failed(e.to_string()))?;
        block_on(
            &self.handle,
            self.client.publish(self.subject.clone(), payload.into()),
        )
        .map_err(|e| failed(e.to_string()))
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
