//! The worker-pool half of the fetch pipeline: a registry that de-duplicates
//! concurrent requests for the same node, and an executor that drains it,
//! fetches via a pluggable [`Transport`], verifies against a
//! `calimero-merkle-tree` [`State`](calimero_merkle_tree::State), and
//! persists into a [`LocalCache`].

#![forbid(unsafe_code)]

mod cache;
mod config;
mod executor;
mod registry;
mod transport;

pub use cache::LocalCache;
pub use config::ExecutorConfig;
pub use executor::Executor;
pub use registry::{CompletedTaskRecord, InFlightRegistry};
pub use transport::{LocalFileTransport, Transport, TransportError};
