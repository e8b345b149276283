//! The line-to-reply interface between a session and an SMTP state machine.
//!
//! A [`Session`](crate::Session) never interprets commands itself. It feeds
//! each complete line to a [`Protocol`] and writes back whatever [`Reply`] comes
//! out. Decisions that need connection state (TLS, authentication, delivery)
//! are made through the [`Hooks`] the session passes in with every line.

mod machine;
pub(crate) mod parser;
/// Replies and a selection of standard SMTP replies.
pub mod reply;

pub use crate::protocol::machine::{Machine, MAX_MESSAGE_SIZE};
pub use crate::protocol::reply::Reply;
use crate::transport::Handshake;

/// A message as received over the wire, before it is finalized.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Domain given in HELO/EHLO
    pub helo: String,
    /// Reverse path from MAIL FROM
    pub from: String,
    /// Forward paths from RCPT TO
    pub to: Vec<String>,
    /// Message content with dot-stuffing removed
    pub data: Vec<u8>,
    /// Was BODY=8BITMIME given?
    pub is8bit: bool,
}

/// Answer to a STARTTLS request.
#[derive(Debug)]
pub enum TlsOutcome {
    /// Refuse the upgrade and send this reply
    Rejected(Reply),
    /// Accept, run the handshake once the go-ahead reply is written
    Deferred(Handshake),
}

/// Answer to an authentication attempt.
#[derive(Debug)]
pub enum AuthOutcome {
    /// The credentials were accepted
    Accepted,
    /// The attempt failed and this reply is sent
    Rejected(Reply),
}

/// Callbacks from the state machine into the session that owns it.
pub trait Hooks {
    /// Can the connection be upgraded to TLS?
    fn supports_tls(&self) -> bool;

    /// The client sent STARTTLS
    fn start_tls(&mut self) -> TlsOutcome;

    /// Authentication mechanisms to advertise and accept
    fn auth_mechanisms(&self) -> Vec<&'static str>;

    /// Check one authentication attempt
    fn validate_auth(&mut self, mechanism: &str, args: &[String]) -> AuthOutcome;

    /// Inspect a command before it runs. Returning a reply rejects the command.
    fn filter_command(&mut self, verb: &str, args: &[&str]) -> Option<Reply>;

    /// A complete message was received. Returns the id to report to the client.
    fn message_received(&mut self, envelope: Envelope) -> anyhow::Result<String>;
}

/// A line oriented SMTP state machine.
pub trait Protocol {
    /// The greeting sent when the client connects
    fn start(&mut self) -> Reply;

    /// Consume one CRLF terminated line from the front of `input`.
    ///
    /// Returns the unconsumed remainder and the reply to send, if any. Input
    /// without a CRLF is returned untouched.
    fn parse<'a>(&mut self, input: &'a [u8], hooks: &mut dyn Hooks)
        -> (&'a [u8], Option<Reply>);

    /// The TLS handshake started by a deferred upgrade has finished
    fn tls_negotiated(&mut self, ok: bool);
}
