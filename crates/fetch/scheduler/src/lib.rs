//! Stateless node selection for the Merkle fetch pipeline.
//!
//! A [`Scheduler`] turns a byte range request plus the current [`State`]
//! into a set of [`NodeTask`]s, joined through a [`SchedulingTarget`] (the
//! in-flight registry, implemented in `calimero-fetch-executor`) so
//! concurrent requests for the same node de-duplicate. The
//! scheduler itself holds no state between calls.

#![forbid(unsafe_code)]

mod handle;
mod strategy;
mod target;
mod task;

pub use handle::{pending, Completer, TaskFailure, TaskHandle, TaskOutcome};
pub use strategy::{AggressiveScheduler, ConservativeScheduler, Scheduler, DEFAULT_MAX_TRANSPORT_CHUNK_SIZE};
pub use target::SchedulingTarget;
pub use task::{NodeTask, Reason, SchedulingDecision};
