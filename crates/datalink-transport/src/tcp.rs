use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Resolve a host/port pair to the first matching socket address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let text = format!("{host}:{port}");
    text.to_socket_addrs()
        .map_err(|_| TransportError::Resolve { addr: text.clone() })?
        .next()
        .ok_or(TransportError::Resolve { addr: text })
}

/// Connect to a listening peer (blocking, bounded by `timeout`).
///
/// The returned stream is left in non-blocking mode, ready for the poll loop.
pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<LinkStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|source| TransportError::Connect { addr, source })?;
    let stream = LinkStream::from_tcp(stream, addr)?;
    stream.set_nonblocking(true)?;
    debug!(%addr, "connected to peer");
    Ok(stream)
}

/// Non-blocking TCP listener.
///
/// [`LinkListener::try_accept`] never waits: it returns `Ok(None)` when no
/// connection is pending, so it can be polled once per scheduler tick.
pub struct LinkListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl LinkListener {
    /// Bind and listen on `addr`. Port 0 picks an ephemeral port.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%addr, "listening for data-link peers");

        Ok(Self { listener, addr })
    }

    /// Accept one pending connection, if any.
    ///
    /// Accepted streams are switched to non-blocking mode.
    pub fn try_accept(&self) -> Result<Option<LinkStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                // Accepted sockets may inherit the listener's mode on some platforms.
                stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                let stream = LinkStream::from_tcp(stream, peer)?;
                stream.set_nonblocking(true)?;
                debug!(%peer, "accepted connection");
                Ok(Some(stream))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// The bound address (with the real port when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

impl std::fmt::Debug for LinkListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkListener")
            .field("addr", &self.addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        resolve("127.0.0.1", 0).unwrap()
    }

    fn accept_within(listener: &LinkListener, timeout: Duration) -> LinkStream {
        let start = Instant::now();
        loop {
            if let Some(stream) = listener.try_accept().unwrap() {
                return stream;
            }
            assert!(start.elapsed() < timeout, "accept timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_bind_accept_connect() {
        let listener = LinkListener::bind(loopback()).unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let mut client = connect(addr, Duration::from_secs(1)).unwrap();
        client.set_nonblocking(false).unwrap();
        client.write_all(b"hello").unwrap();

        let mut server = accept_within(&listener, Duration::from_secs(2));
        server.set_nonblocking(false).unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_try_accept_without_pending_returns_none() {
        let listener = LinkListener::bind(loopback()).unwrap();
        assert!(listener.try_accept().unwrap().is_none());
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port that nothing listens on.
        let addr = {
            let listener = LinkListener::bind(loopback()).unwrap();
            listener.local_addr()
        };
        let result = connect(addr, Duration::from_millis(200));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_bind_conflict_reports_bind_error() {
        let listener = LinkListener::bind(loopback()).unwrap();
        let result = LinkListener::bind(listener.local_addr());
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_resolve_literal_address() {
        let addr = resolve("127.0.0.1", 9334).unwrap();
        assert_eq!(addr.port(), 9334);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_nonblocking_read_would_block() {
        let listener = LinkListener::bind(loopback()).unwrap();
        let _client = connect(listener.local_addr(), Duration::from_secs(1)).unwrap();
        let mut server = accept_within(&listener, Duration::from_secs(2));

        let mut buf = [0u8; 4];
        let err = server.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert_eq!(server.peer_addr().ip(), listener.local_addr().ip());
    }
}
