mod gate;
mod line;

use crate::logger::Logger;
use crate::message::Message;
use crate::protocol::reply::LINE_TOO_LONG;
use crate::protocol::{Machine, Protocol, Reply};
use crate::session::gate::Gate;
use crate::session::line::{LineBuffer, MAX_LINE};
use crate::transport::{Handshake, Refused, Transport};
use rustls::ServerConfig;
use std::fmt::Display;
use std::io;
use std::sync::Arc;

/// Receives every message accepted by a session.
///
/// Returning an error makes the session reply with a transaction failure.
pub type MessageHandler = Arc<dyn Fn(Message) -> anyhow::Result<()> + Send + Sync>;

/// Checks a username and password. Returning an error rejects the attempt.
pub type Authenticator = Arc<dyn Fn(&str, &str) -> anyhow::Result<()> + Send + Sync>;

const READ_CHUNK: usize = 1024;

/// Builds a [`Session`] for each accepted connection.
///
/// # Examples
/// ```
/// use smtpserve::SessionBuilder;
///
/// let mut builder = SessionBuilder::new("mx.example.org");
/// builder
///     .handler(|message| {
///         println!("{} from {}", message.id, message.from);
///         Ok(())
///     })
///     .authenticator(|user, password| {
///         anyhow::ensure!(user == "alice" && password == "secret", "invalid credentials");
///         Ok(())
///     });
/// ```
#[derive(Clone)]
pub struct SessionBuilder {
    hostname: String,
    tls: Option<Arc<ServerConfig>>,
    authenticator: Option<Authenticator>,
    handler: MessageHandler,
    logger: Logger,
}

impl SessionBuilder {
    /// Sessions for a server known as `hostname`, accepting every message
    pub fn new<S: Into<String>>(hostname: S) -> Self {
        Self {
            hostname: hostname.into(),
            tls: None,
            authenticator: None,
            handler: Arc::new(|_| Ok(())),
            logger: Logger::silent(),
        }
    }

    /// The name the server greets clients with
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Offer STARTTLS using this certificate configuration
    pub fn tls(&mut self, config: Arc<ServerConfig>) -> &mut Self {
        self.tls = Some(config);
        self
    }

    /// Require clients to authenticate before sending mail
    pub fn authenticator<F>(&mut self, authenticator: F) -> &mut Self
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Deliver received messages to this handler
    pub fn handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Trace session activity to this logger
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// Build a session running the bundled state machine
    pub fn build<T, R>(&self, remote: R, transport: T) -> Session<Machine>
    where
        T: Transport + 'static,
        R: Display,
    {
        let machine = Machine::new(self.hostname.clone());
        self.build_with(remote, Box::new(transport), machine)
    }

    /// Build a session around any state machine
    pub fn build_with<P, R>(&self, remote: R, transport: Box<dyn Transport>, protocol: P) -> Session<P>
    where
        P: Protocol,
        R: Display,
    {
        let remote = remote.to_string();
        let logger = self.logger.with_prefix(format!("[SMTP {}]", remote));
        Session {
            transport: Some(transport),
            protocol,
            buffer: LineBuffer::new(),
            remote,
            gate: Gate {
                hostname: self.hostname.clone(),
                secure: false,
                authenticated: false,
                tls: self.tls.clone(),
                authenticator: self.authenticator.clone(),
                handler: self.handler.clone(),
                logger: logger.clone(),
            },
            logger,
        }
    }
}

/// A single SMTP session connected to a single client.
///
/// The session owns the connection. It is closed exactly once, when
/// [`Session::run`] returns.
pub struct Session<P: Protocol = Machine> {
    // None once the connection has been closed
    transport: Option<Box<dyn Transport>>,
    protocol: P,
    buffer: LineBuffer,
    remote: String,
    gate: Gate,
    logger: Logger,
}

impl<P: Protocol> Session<P> {
    /// Display form of the peer address
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Has the connection been upgraded with STARTTLS?
    pub fn is_secure(&self) -> bool {
        self.gate.secure
    }

    /// Has the client authenticated?
    pub fn is_authenticated(&self) -> bool {
        self.gate.authenticated
    }

    /// Talk to the client until it quits or the connection drops.
    pub fn run(mut self) {
        self.logger.log(format_args!("Starting session"));
        let greeting = self.protocol.start();
        if self.write(greeting) {
            while self.read() {}
        }
        if !self.buffer.is_empty() {
            self.logger.log(format_args!(
                "Discarding {} unterminated bytes",
                self.buffer.len()
            ));
        }
        self.close();
        self.logger.log(format_args!("Session ended"));
    }

    // Read one chunk and process every complete line in it.
    // Returns false when the session is over.
    fn read(&mut self) -> bool {
        let mut chunk = [0u8; READ_CHUNK];
        let n = loop {
            let transport = match self.transport.as_mut() {
                Some(transport) => transport,
                None => return false,
            };
            match transport.read(&mut chunk) {
                Ok(0) => {
                    self.logger
                        .log(format_args!("Connection closed by remote host"));
                    return false;
                }
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.logger
                        .log(format_args!("Error reading from socket: {}", e));
                    return false;
                }
            }
        };
        if self.logger.is_enabled() {
            self.logger.log(format_args!(
                "Received {} bytes: '{}'",
                n,
                escape(&chunk[..n])
            ));
        }

        self.buffer.extend(&chunk[..n]);
        while let Some(line) = self.buffer.take_line() {
            let (rest, reply) = self.protocol.parse(&line, &mut self.gate);
            let stalled = rest.len() == line.len();
            self.buffer.unread(rest);
            if let Some(reply) = reply {
                if !self.write(reply) {
                    return false;
                }
            }
            if stalled {
                // The protocol wants more input before it can use this line
                break;
            }
        }
        if self.buffer.overflowed() {
            self.logger
                .log(format_args!("Dropping line longer than {} bytes", MAX_LINE));
            return self.write(LINE_TOO_LONG.clone());
        }
        true
    }

    // Send every line of a reply, then act on it.
    // Returns false when the session is over.
    fn write(&mut self, mut reply: Reply) -> bool {
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return false,
        };
        for line in reply.lines() {
            if self.logger.is_enabled() {
                self.logger.log(format_args!(
                    "Sent {} bytes: '{}'",
                    line.len(),
                    escape(line.as_bytes())
                ));
            }
            if let Err(e) = transport.write_all(line.as_bytes()) {
                self.logger
                    .log(format_args!("Error writing to socket: {}", e));
                return false;
            }
        }
        if let Err(e) = transport.flush() {
            self.logger
                .log(format_args!("Error writing to socket: {}", e));
            return false;
        }

        if let Some(handshake) = reply.take_handshake() {
            self.upgrade(handshake);
        }
        if reply.is_terminal() {
            self.close();
            return false;
        }
        true
    }

    // Swap the plaintext transport for an encrypted one
    fn upgrade(&mut self, handshake: Handshake) {
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => return,
        };
        self.logger.log(format_args!("Upgrading session to TLS"));
        match handshake.perform(transport) {
            Ok(secure) => {
                self.transport = Some(secure);
                self.gate.secure = true;
                // Plaintext sent after STARTTLS must not be read as commands
                self.buffer.clear();
                self.logger.log(format_args!("Session upgrade complete"));
                self.protocol.tls_negotiated(true);
            }
            Err(Refused { transport, error }) => {
                self.transport = Some(transport);
                self.logger
                    .log(format_args!("handshake error in TLS connection: {}", error));
                self.protocol.tls_negotiated(false);
            }
        }
    }

    // Close the connection. Only the first call does anything.
    fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown() {
                self.logger
                    .log(format_args!("Error closing connection: {}", e));
            }
        }
    }
}

// Make CR and LF visible in traces
fn escape(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
