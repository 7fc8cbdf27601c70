//! Bidirectional relay between a client and an outbound stream
//!
//! Pumps bytes in both directions until both sides reach EOF, the
//! connection idles out, or an I/O error occurs. Half-close is
//! propagated: EOF on one side shuts down the peer's write half while
//! the opposite direction keeps flowing.
//!
//! Errors end the relay in both directions at once. The byte counts
//! accumulated up to that point are still reported, so transfer totals
//! stay accurate.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};
use tracing::debug;

/// Relay buffer size per direction
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// How a relay ended, with per-direction byte counts
#[derive(Debug)]
pub struct RelayOutcome {
    /// Bytes moved client -> destination
    pub bytes_up: u64,
    /// Bytes moved destination -> client
    pub bytes_down: u64,
    /// The relay was cut because neither direction moved bytes for the
    /// idle timeout
    pub idle: bool,
    /// First mid-stream I/O error, when one ended the relay
    pub error: Option<io::Error>,
}

impl RelayOutcome {
    /// Total bytes moved in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }
}

/// One direction of the relay
struct Pipe {
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
    read_done: bool,
    write_done: bool,
    transferred: u64,
}

impl Pipe {
    fn new(buf_size: usize) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            pos: 0,
            cap: 0,
            read_done: false,
            write_done: false,
            transferred: 0,
        }
    }

    /// Drive this direction: drain the buffer into the writer, refill
    /// from the reader, and on EOF flush and shut the writer down.
    fn poll_pipe<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            if self.pos < self.cap {
                let n = ready!(writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]))?;
                if n == 0 {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "relay peer stopped accepting bytes",
                    )));
                }
                self.pos += n;
                self.transferred += n as u64;
                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                if !self.write_done {
                    ready!(writer.as_mut().poll_flush(cx))?;
                    ready!(writer.as_mut().poll_shutdown(cx))?;
                    self.write_done = true;
                }
                return Poll::Ready(Ok(()));
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                ready!(reader.as_mut().poll_read(cx, &mut read_buf))?;
                let n = read_buf.filled().len();
                if n == 0 {
                    self.read_done = true;
                } else {
                    self.cap = n;
                }
            }
        }
    }
}

/// The relay future: two pipes plus an idle watchdog
struct Relay<'a, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    client: &'a mut A,
    remote: &'a mut B,
    up: Pipe,
    down: Pipe,
    idle_timeout: Duration,
    idle: Pin<Box<Sleep>>,
}

impl<'a, A, B> Relay<'a, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    fn new(client: &'a mut A, remote: &'a mut B, idle_timeout: Duration, buf_size: usize) -> Self {
        Self {
            client,
            remote,
            up: Pipe::new(buf_size),
            down: Pipe::new(buf_size),
            idle_timeout,
            idle: Box::pin(tokio::time::sleep(idle_timeout)),
        }
    }

    fn outcome(&self, idle: bool, error: Option<io::Error>) -> RelayOutcome {
        RelayOutcome {
            bytes_up: self.up.transferred,
            bytes_down: self.down.transferred,
            idle,
            error,
        }
    }
}

impl<A, B> Future for Relay<'_, A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    type Output = RelayOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let before = this.up.transferred + this.down.transferred;

        let up_done = match this
            .up
            .poll_pipe(cx, Pin::new(&mut this.client), Pin::new(&mut this.remote))
        {
            Poll::Ready(Ok(())) => true,
            Poll::Ready(Err(e)) => {
                debug!(error = %e, "relay upstream direction failed");
                return Poll::Ready(this.outcome(false, Some(e)));
            }
            Poll::Pending => false,
        };

        let down_done = match this
            .down
            .poll_pipe(cx, Pin::new(&mut this.remote), Pin::new(&mut this.client))
        {
            Poll::Ready(Ok(())) => true,
            Poll::Ready(Err(e)) => {
                debug!(error = %e, "relay downstream direction failed");
                return Poll::Ready(this.outcome(false, Some(e)));
            }
            Poll::Pending => false,
        };

        if up_done && down_done {
            return Poll::Ready(this.outcome(false, None));
        }

        // Any progress pushes the idle deadline out
        if this.up.transferred + this.down.transferred > before {
            let deadline = Instant::now() + this.idle_timeout;
            this.idle.as_mut().reset(deadline);
        }
        if this.idle.as_mut().poll(cx).is_ready() {
            debug!(
                idle_secs = this.idle_timeout.as_secs(),
                "relay idle timeout, closing both directions"
            );
            return Poll::Ready(this.outcome(true, None));
        }

        Poll::Pending
    }
}

/// Relay bytes between two streams until EOF both ways, an idle
/// timeout, or an error
///
/// The outcome always carries the byte counts moved so far, whatever
/// ended the relay.
pub async fn relay_bidirectional<A, B>(
    client: &mut A,
    remote: &mut B,
    idle_timeout: Duration,
) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    Relay::new(client, remote, idle_timeout, RELAY_BUFFER_SIZE).await
}

/// Same as [`relay_bidirectional`] with a custom per-direction buffer
pub async fn relay_with_buffer<A, B>(
    client: &mut A,
    remote: &mut B,
    idle_timeout: Duration,
    buf_size: usize,
) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    Relay::new(client, remote, idle_timeout, buf_size).await
}
