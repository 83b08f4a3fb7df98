//! The outward-facing half of the fetch pipeline (C9): a positional read
//! surface that triggers scheduling on demand and awaits the resulting
//! node handles before returning verified bytes from the local cache.

#![forbid(unsafe_code)]

mod channel;
mod error;
mod reader;

pub use channel::Channel;
pub use error::ChannelError;
pub use reader::ChannelReader;
