use crate::logger::Logger;
use crate::message::Message;
use crate::session::{Authenticator, MessageHandler, SessionBuilder};
use anyhow::{Context, Result};
use log::{error, info};
use rustls::ServerConfig;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

const DEFAULT_ADDR: &str = "0.0.0.0:2500";

/// A blocking SMTP server running one thread per connection.
///
/// # Examples
/// ```no_run
/// use smtpserve::Server;
///
/// let mut server = Server::new(|message| {
///     println!("{}", message.body_text());
///     Ok(())
/// });
/// server.with_name("smtp.example.org").with_addr("127.0.0.1:2525");
/// server.serve().unwrap();
/// ```
#[derive(Clone)]
pub struct Server {
    addr: String,
    name: Option<String>,
    tls: Option<Arc<ServerConfig>>,
    authenticator: Option<Authenticator>,
    handler: MessageHandler,
    debug: bool,
}

impl Default for Server {
    /// A server that accepts and discards every message
    fn default() -> Self {
        Self::new(|_| Ok(()))
    }
}

impl Server {
    /// Create a server delivering messages to `handler`
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            name: None,
            tls: None,
            authenticator: None,
            handler: Arc::new(handler),
            debug: false,
        }
    }

    /// Set the hostname reported in the greeting and in trace headers
    pub fn with_name<S: Into<String>>(&mut self, name: S) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Set the address to listen on
    pub fn with_addr<S: Into<String>>(&mut self, addr: S) -> &mut Self {
        self.addr = addr.into();
        self
    }

    /// Offer STARTTLS with this certificate configuration
    pub fn with_tls(&mut self, config: Arc<ServerConfig>) -> &mut Self {
        self.tls = Some(config);
        self
    }

    /// Require authentication, checking credentials with `authenticator`
    pub fn with_authenticator<F>(&mut self, authenticator: F) -> &mut Self
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Trace every session to the `log` facade at debug level
    pub fn with_debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    /// The hostname used in SMTP, the listen address unless one was set
    pub fn hostname(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.addr)
    }

    /// Bind to the configured address and serve connections forever
    pub fn serve(&self) -> Result<()> {
        info!("[SMTP] Binding to address: {}", self.addr);
        let listener = TcpListener::bind(&self.addr).map_err(|e| {
            error!("[SMTP] Error listening on socket: {}", e);
            e
        })?;
        self.serve_listener(listener)
    }

    /// Serve connections arriving on an already bound listener
    pub fn serve_listener(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().context("listener address")?;
        info!("[SMTP] Accepting connections on {}", local);
        let builder = self.session_builder();
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    error!("[SMTP] Error accepting connection: {}", e);
                    continue;
                }
            };
            let remote = match stream.peer_addr() {
                Ok(addr) => addr.to_string(),
                Err(_) => "unknown".to_string(),
            };
            let builder = builder.clone();
            thread::spawn(move || builder.build(remote, stream).run());
        }
        Ok(())
    }

    fn session_builder(&self) -> SessionBuilder {
        let mut builder = SessionBuilder::new(self.hostname());
        let handler = self.handler.clone();
        builder.handler(move |message| handler(message));
        if let Some(authenticator) = &self.authenticator {
            let authenticator = authenticator.clone();
            builder.authenticator(move |user, password| authenticator(user, password));
        }
        if let Some(tls) = &self.tls {
            builder.tls(tls.clone());
        }
        if self.debug {
            builder.logger(Logger::debug());
        }
        builder
    }
}
