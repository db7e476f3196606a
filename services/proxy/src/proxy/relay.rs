//! One direction of a proxied connection.
//!
//! Each non-empty read is handed to a [`CaptureSink`] before it is written
//! to the destination. The copy ends on EOF, on any read or write error,
//! or when either stop signal fires. Every terminal path except an
//! externally signalled stop sets the pair signal so the opposite
//! direction unwinds too.

use nettools_capture::Direction;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::signal::StopSignal;
use crate::error::is_orderly_close;

/// Read size for each relay iteration.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Destination for side-channel copies of relayed chunks.
pub trait CaptureSink: Send + Sync {
    fn capture(&self, direction: Direction, data: &[u8]);
}

/// Stop signals a relay observes.
#[derive(Debug, Clone, Copy)]
pub struct RelaySignals<'a> {
    /// Stops every connection on the instance.
    pub instance: &'a StopSignal,
    /// Stops just this client/upstream pair.
    pub pair: &'a StopSignal,
}

impl RelaySignals<'_> {
    fn is_stopped(&self) -> bool {
        self.instance.is_triggered() || self.pair.is_triggered()
    }

    async fn stopped(&self) {
        tokio::select! {
            _ = self.instance.triggered() => {}
            _ = self.pair.triggered() => {}
        }
    }
}

/// Copy `src` into `dst`, capturing every chunk. Returns bytes forwarded.
pub async fn copy_with_capture<R, W, S>(
    src: &mut R,
    dst: &mut W,
    direction: Direction,
    sink: &S,
    signals: RelaySignals<'_>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: CaptureSink + ?Sized,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        if signals.is_stopped() {
            return total;
        }

        let read = tokio::select! {
            biased;
            _ = signals.stopped() => return total,
            result = src.read(&mut buf) => result,
        };

        let n = match read {
            Ok(0) => {
                debug!(%direction, "Peer closed");
                signals.pair.trigger();
                return total;
            }
            Ok(n) => n,
            Err(e) if is_orderly_close(&e) => {
                debug!(%direction, error = %e, "Connection closed");
                signals.pair.trigger();
                return total;
            }
            Err(e) => {
                warn!(%direction, error = %e, "Read error");
                signals.pair.trigger();
                return total;
            }
        };

        let data = &buf[..n];
        sink.capture(direction, data);

        let written = tokio::select! {
            biased;
            _ = signals.stopped() => return total,
            result = dst.write_all(data) => result,
        };

        if let Err(e) = written {
            if is_orderly_close(&e) {
                debug!(%direction, error = %e, "Destination closed");
            } else {
                warn!(%direction, error = %e, "Write error");
            }
            signals.pair.trigger();
            return total;
        }

        total += n as u64;
    }
}
