use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::error::Result;

/// A connected link stream implementing `Read` and `Write`.
///
/// Wraps a TCP stream with `TCP_NODELAY` set, since pose frames are small and
/// latency-sensitive.
pub struct LinkStream {
    inner: TcpStream,
    peer: SocketAddr,
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl LinkStream {
    /// Create a LinkStream from a connected TCP stream.
    pub(crate) fn from_tcp(stream: TcpStream, peer: SocketAddr) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            inner: stream,
            peer,
        })
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address of this end.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }

    /// Switch the stream between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.inner
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// Try to clone this stream (creates a new socket handle).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self {
            inner: cloned,
            peer: self.peer,
        })
    }

    /// Close both directions. Errors are ignored: the peer may already be gone.
    pub fn close(&self) {
        let _ = self.inner.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &"tcp")
            .field("peer", &self.peer)
            .finish()
    }
}
