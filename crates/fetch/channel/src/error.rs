use calimero_fetch_scheduler::TaskFailure;
use thiserror::Error;

/// Errors surfaced by a positional [`crate::Channel::read`].
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ChannelError {
    /// One of the awaited node downloads failed; this is the first failure
    /// observed among the handles a read awaited (§7: "the channel facade
    /// surfaces the first failure encountered among awaited handles").
    #[error(transparent)]
    Task(#[from] TaskFailure),

    /// The final cache-to-caller copy failed.
    #[error("cache read failed: {0}")]
    CacheRead(String),
}
