//! Phase reconciliation and the tick loop for the take-over trial controller.
//!
//! Three processes report the trial's progress: the simulator, the scenario
//! script and this controller. This crate merges the two upstream reports
//! into one monotonically advancing phase per tick and fires each phase's
//! entry actions exactly once.
//!
//! # Modules
//!
//! - [`actions`] -- Entry actions for each phase (recorders, stopwatch,
//!   vehicle control).
//! - [`channel`] -- [`StatusSubscriber`] / [`StatusPublisher`] traits and the
//!   single-slot [`Mailbox`].
//! - [`collaborators`] -- Traits for the frame source, vehicle control,
//!   recorders, eye tracker and clock.
//! - [`config`] -- Configuration loading from `handover-config.yaml`.
//! - [`reconcile`] -- The pure index-based merge.
//! - [`runner`] -- [`run_trial`], the loop that runs ticks until `TrialOver`.
//! - [`state`] -- [`TrialState`] and fatal [`ConsistencyError`]s.
//! - [`stopwatch`] -- Reaction-time stopwatch.
//! - [`tick`] -- [`run_tick`], one poll/merge/enter/sample cycle.
//!
//! [`StatusSubscriber`]: channel::StatusSubscriber
//! [`StatusPublisher`]: channel::StatusPublisher
//! [`Mailbox`]: channel::Mailbox
//! [`run_trial`]: runner::run_trial
//! [`TrialState`]: state::TrialState
//! [`ConsistencyError`]: state::ConsistencyError
//! [`run_tick`]: tick::run_tick

pub mod actions;
pub mod channel;
pub mod collaborators;
pub mod config;
pub mod reconcile;
pub mod runner;
pub mod state;
pub mod stopwatch;
pub mod tick;
