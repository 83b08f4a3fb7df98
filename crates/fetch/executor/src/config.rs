use std::time::Duration;

/// Tunables for an [`crate::Executor`].
///
/// The completed-task history ring is sized separately, as an argument to
/// [`crate::InFlightRegistry::new`]: the registry is constructed by the
/// caller and shared with both the executor and the channel facade, so its
/// capacity isn't an `Executor` tunable.
///
/// Plain data; parsing these from CLI args or a config file is an embedding
/// application's concern, out of scope here.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// `W`: the worker concurrency semaphore's capacity.
    pub concurrency: usize,
    /// How long a worker blocks in `take_next` before looping to check for
    /// cancellation.
    pub take_next_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            take_next_timeout: Duration::from_millis(200),
        }
    }
}
