use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

/// A bidirectional byte stream owned by a single session.
///
/// The session holds exactly one `Box<dyn Transport>`. A successful STARTTLS
/// replaces it with the encrypted transport returned by [`Transport::start_tls`]
/// and the plaintext one is never touched again.
pub trait Transport: Read + Write + Send {
    /// Close both directions of the stream.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Run a server side TLS handshake over this transport.
    ///
    /// On failure the untouched transport is handed back inside [`Refused`].
    fn start_tls(self: Box<Self>, config: Arc<ServerConfig>)
        -> Result<Box<dyn Transport>, Refused>;

    /// Is traffic on this transport encrypted?
    fn is_secure(&self) -> bool {
        false
    }
}

/// A failed upgrade, returning ownership of the original transport.
pub struct Refused {
    /// The transport that was offered for the upgrade
    pub transport: Box<dyn Transport>,
    /// Why the handshake failed
    pub error: io::Error,
}

impl fmt::Debug for Refused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refused")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// A deferred TLS upgrade, carried by the reply that precedes it.
#[derive(Clone, Debug)]
pub struct Handshake {
    config: Arc<ServerConfig>,
}

impl Handshake {
    /// Prepare an upgrade using the given certificate configuration
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Consume the transport and return the encrypted one.
    pub fn perform(self, transport: Box<dyn Transport>) -> Result<Box<dyn Transport>, Refused> {
        transport.start_tls(self.config)
    }
}

impl PartialEq for Handshake {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.config, &other.config)
    }
}

fn shutdown_socket(sock: &TcpStream) -> io::Result<()> {
    match sock.shutdown(Shutdown::Both) {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        res => res,
    }
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        shutdown_socket(self)
    }

    fn start_tls(
        self: Box<Self>,
        config: Arc<ServerConfig>,
    ) -> Result<Box<dyn Transport>, Refused> {
        let conn = match ServerConnection::new(config) {
            Ok(conn) => conn,
            Err(e) => {
                return Err(Refused {
                    transport: self,
                    error: io::Error::new(io::ErrorKind::InvalidData, e),
                })
            }
        };
        let mut stream = StreamOwned::new(conn, *self);
        while stream.conn.is_handshaking() {
            if let Err(error) = stream.conn.complete_io(&mut stream.sock) {
                let (_, sock) = stream.into_parts();
                return Err(Refused {
                    transport: Box::new(sock),
                    error,
                });
            }
        }
        Ok(Box::new(TlsTransport(stream)))
    }
}

/// A TCP connection after a completed STARTTLS handshake.
pub struct TlsTransport(StreamOwned<ServerConnection, TcpStream>);

impl Read for TlsTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for TlsTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Transport for TlsTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        self.0.conn.send_close_notify();
        // The peer may already be gone, the socket is closed regardless
        let _ = self.0.flush();
        shutdown_socket(&self.0.sock)
    }

    fn start_tls(
        self: Box<Self>,
        _config: Arc<ServerConfig>,
    ) -> Result<Box<dyn Transport>, Refused> {
        Err(Refused {
            transport: self,
            error: io::Error::new(io::ErrorKind::Other, "transport is already encrypted"),
        })
    }

    fn is_secure(&self) -> bool {
        true
    }
}
