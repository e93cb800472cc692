//! Latest-value status channels.
//!
//! The tick loop talks to the three status channels through
//! [`StatusSubscriber`] and [`StatusPublisher`]. Subscribers conflate: a
//! receive returns only the newest pending message and drops older ones.
//!
//! [`conflating`] builds the hand-off underneath: a one-slot crossbeam
//! channel whose sender evicts the stale value before sending. Once every
//! [`LatestSender`] is gone the receiver reports the channel closed.
//! [`Mailbox`] keeps both ends together for producers in the same process
//! and for tests.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, Sender, TrySendError};
use handover_types::{MalformedStatus, StatusMessage};

/// Errors raised by a status channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The other end of the channel is gone.
    #[error("channel {channel} is closed")]
    Closed {
        /// Channel name (subject or mailbox label).
        channel: String,
    },

    /// A payload arrived but is not a usable status message.
    #[error("malformed message on {channel}: {source}")]
    Malformed {
        /// Channel name.
        channel: String,
        /// What was wrong with it.
        source: MalformedStatus,
    },

    /// The transport rejected the operation.
    #[error("transport error on {channel}: {message}")]
    Transport {
        /// Channel name.
        channel: String,
        /// Description of the error.
        message: String,
    },
}

/// Receive side of a conflating status channel.
pub trait StatusSubscriber {
    /// Return the most recent undelivered message, discarding older ones, or
    /// `None` if nothing arrives within `wait`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the channel is closed or the newest
    /// payload is malformed.
    fn try_receive_latest(&mut self, wait: Duration) -> Result<Option<StatusMessage>, ChannelError>;
}

/// Send side of a status channel. Fire-and-forget.
pub trait StatusPublisher {
    /// Publish `message`. Delivery is not confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the message could not be handed to the
    /// transport.
    fn publish(&mut self, message: &StatusMessage) -> Result<(), ChannelError>;
}

/// A conflating channel that holds at most one value.
pub fn conflating<T>() -> (LatestSender<T>, LatestReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        LatestSender {
            tx,
            stale: rx.clone(),
        },
        LatestReceiver { rx },
    )
}

/// Send half of [`conflating`].
#[derive(Debug)]
pub struct LatestSender<T> {
    tx: Sender<T>,
    stale: Receiver<T>,
}

impl<T> Clone for LatestSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stale: self.stale.clone(),
        }
    }
}

impl<T> LatestSender<T> {
    /// Replace whatever is pending with `value`.
    pub fn post(&self, mut value: T) {
        loop {
            match self.tx.try_send(value) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    // Lost races only mean another value was evicted first.
                    self.stale.try_recv().ok();
                    value = back;
                }
            }
        }
    }
}

/// Receive half of [`conflating`].
#[derive(Debug)]
pub struct LatestReceiver<T> {
    rx: Receiver<T>,
}

impl<T> Clone for LatestReceiver<T> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T> LatestReceiver<T> {
    /// Take the pending value, waiting up to `wait` for one to arrive.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError`] once the slot is empty and every sender is gone.
    pub fn recv_latest(&self, wait: Duration) -> Result<Option<T>, RecvError> {
        match self.rx.recv_timeout(wait) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RecvError),
        }
    }

    /// Whether a value is pending.
    pub fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Both ends of a [`conflating`] channel in one handle.
///
/// Clones share the slot. [`Mailbox::post`] replaces whatever is pending;
/// [`Mailbox::take_latest`] empties the slot. A mailbox never closes.
#[derive(Debug)]
pub struct Mailbox<T> {
    tx: LatestSender<T>,
    rx: LatestReceiver<T>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    /// An empty mailbox.
    pub fn new() -> Self {
        let (tx, rx) = conflating();
        Self { tx, rx }
    }

    /// Overwrite the slot with `value` and wake a waiting receiver.
    pub fn post(&self, value: T) {
        self.tx.post(value);
    }

    /// Take the pending value, waiting up to `wait` for one to arrive.
    pub fn take_latest(&self, wait: Duration) -> Option<T> {
        self.rx.recv_latest(wait).ok().flatten()
    }

    /// Whether a value is pending.
    pub fn is_pending(&self) -> bool {
        self.rx.is_pending()
    }
}

impl StatusSubscriber for Mailbox<StatusMessage> {
    fn try_receive_latest(&mut self, wait: Duration) -> Result<Option<StatusMessage>, ChannelError> {
        Ok(self.take_latest(wait))
    }
}

impl StatusPublisher for Mailbox<StatusMessage> {
    fn publish(&mut self, message: &StatusMessage) -> Result<(), ChannelError> {
        self.post(message.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use chrono::NaiveDate;
    use handover_types::{Origin, Phase};

    use super::*;

    fn message(phase: Phase) -> StatusMessage {
        let at = NaiveDate::from_ymd_opt(2024, 3, 21)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        StatusMessage::new(Origin::Simulator, phase, &at)
    }

    #[test]
    fn empty_mailbox_times_out() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert_eq!(mailbox.take_latest(Duration::from_millis(1)), None);
        assert_eq!(mailbox.take_latest(Duration::ZERO), None);
    }

    #[test]
    fn later_posts_overwrite_earlier_ones() {
        let mailbox = Mailbox::new();
        mailbox.post(1_u32);
        mailbox.post(2);
        mailbox.post(3);
        assert_eq!(mailbox.take_latest(Duration::ZERO), Some(3));
        assert!(!mailbox.is_pending());
        assert_eq!(mailbox.take_latest(Duration::from_millis(1)), None);
    }

    #[test]
    fn receiver_wakes_on_post_from_another_thread() {
        let mailbox = Mailbox::new();
        let producer = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            producer.post(7_u32);
        });
        assert_eq!(mailbox.take_latest(Duration::from_secs(2)), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn receiver_closes_after_last_sender_drops() {
        let (tx, rx) = conflating();
        tx.post(1_u32);
        tx.post(2);
        drop(tx);
        assert_eq!(rx.recv_latest(Duration::ZERO), Ok(Some(2)));
        assert_eq!(rx.recv_latest(Duration::from_millis(1)), Err(RecvError));
    }

    #[test]
    fn concurrent_posts_leave_only_the_newest() {
        let (tx, rx) = conflating();
        let producers: Vec<_> = (0..4_u32)
            .map(|id| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for n in 0..100_u32 {
                        tx.post((id, n));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(rx.recv_latest(Duration::ZERO).unwrap().is_some());
        assert!(!rx.is_pending());
    }

    #[test]
    fn status_traits_round_trip_through_one_slot() {
        let mut tx: Mailbox<StatusMessage> = Mailbox::new();
        let mut rx = tx.clone();
        tx.publish(&message(Phase::Autopilot)).unwrap();
        tx.publish(&message(Phase::TakeOver)).unwrap();
        let got = rx.try_receive_latest(Duration::from_millis(1)).unwrap().unwrap();
        assert_eq!(got.vehicle_status, "TakeOver");
        assert!(rx.try_receive_latest(Duration::from_millis(1)).unwrap().is_none());
    }
}
