use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::channel::Channel;

type PendingRead = Pin<Box<dyn Future<Output = io::Result<Vec<u8>>> + Send>>;

/// Adapts a [`Channel`] into [`tokio::io::AsyncRead`] + [`tokio::io::AsyncSeek`],
/// the "seekable read surface" §4.7 describes, for callers that want to
/// treat the remote content as an ordinary file-like stream rather than
/// calling [`Channel::read`] directly.
pub struct ChannelReader {
    channel: Channel,
    position: u64,
    pending: Option<PendingRead>,
}

impl ChannelReader {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            position: 0,
            pending: None,
        }
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            if let Some(pending) = self.pending.as_mut() {
                return match pending.as_mut().poll(cx) {
                    Poll::Ready(Ok(data)) => {
                        let n = data.len();
                        buf.put_slice(&data);
                        self.position += n as u64;
                        self.pending = None;
                        Poll::Ready(Ok(()))
                    }
                    Poll::Ready(Err(err)) => {
                        self.pending = None;
                        Poll::Ready(Err(err))
                    }
                    Poll::Pending => Poll::Pending,
                };
            }

            let want = buf.remaining();
            if want == 0 {
                return Poll::Ready(Ok(()));
            }
            let channel = self.channel.clone();
            let position = self.position;
            self.pending = Some(Box::pin(async move {
                let mut tmp = vec![0u8; want];
                let n = channel
                    .read(&mut tmp, position)
                    .await
                    .map_err(|err| io::Error::other(err.to_string()))?;
                tmp.truncate(n);
                Ok(tmp)
            }));
        }
    }
}

impl AsyncSeek for ChannelReader {
    fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        let content_size = self.channel.content_size();
        let new_position = match position {
            io::SeekFrom::Start(p) => p,
            io::SeekFrom::Current(delta) => checked_offset(self.position, delta)?,
            io::SeekFrom::End(delta) => checked_offset(content_size, delta)?,
        };
        self.position = new_position;
        self.pending = None;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}

fn checked_offset(base: u64, delta: i64) -> io::Result<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek position out of range"))
}
