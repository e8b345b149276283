use crate::logger::Logger;
use crate::message::Message;
use crate::protocol::reply::*;
use crate::protocol::{AuthOutcome, Envelope, Hooks, TlsOutcome};
use crate::session::{Authenticator, MessageHandler};
use crate::transport::Handshake;
use rustls::ServerConfig;
use std::sync::Arc;

const PLAIN: &str = "PLAIN";

// The verb that opens a mail transaction
const MAIL: &str = "MAIL";

/// Connection state the state machine can see and change through [`Hooks`].
pub(crate) struct Gate {
    pub(crate) hostname: String,
    pub(crate) secure: bool,
    pub(crate) authenticated: bool,
    pub(crate) tls: Option<Arc<ServerConfig>>,
    pub(crate) authenticator: Option<Authenticator>,
    pub(crate) handler: MessageHandler,
    pub(crate) logger: Logger,
}

impl Hooks for Gate {
    fn supports_tls(&self) -> bool {
        self.tls.is_some() && !self.secure
    }

    fn start_tls(&mut self) -> TlsOutcome {
        match &self.tls {
            Some(config) => {
                self.logger.log(format_args!("Returning TLS handler"));
                TlsOutcome::Deferred(Handshake::new(config.clone()))
            }
            None => TlsOutcome::Rejected(TLS_UNAVAILABLE.clone()),
        }
    }

    fn auth_mechanisms(&self) -> Vec<&'static str> {
        match self.authenticator {
            Some(_) => vec![PLAIN],
            None => Vec::new(),
        }
    }

    fn validate_auth(&mut self, mechanism: &str, args: &[String]) -> AuthOutcome {
        let authenticate = match &self.authenticator {
            Some(authenticate) => authenticate,
            None => return AuthOutcome::Rejected(UNSUPPORTED_MECHANISM.clone()),
        };
        if mechanism != PLAIN {
            return AuthOutcome::Rejected(Reply::custom(
                504,
                format!("{:?} is not a supported AUTH mechanism", mechanism),
            ));
        }
        if args.len() < 2 {
            return AuthOutcome::Rejected(Reply::custom(
                501,
                "Must provide a username and password",
            ));
        }
        match authenticate(&args[0], &args[1]) {
            Ok(()) => {
                self.logger
                    .log(format_args!("Authenticated as {}", args[0]));
                self.authenticated = true;
                AuthOutcome::Accepted
            }
            Err(e) => {
                self.logger
                    .log(format_args!("Authentication failed for {}: {}", args[0], e));
                AuthOutcome::Rejected(Reply::error(535, e))
            }
        }
    }

    fn filter_command(&mut self, verb: &str, _args: &[&str]) -> Option<Reply> {
        if self.authenticator.is_some() && !self.authenticated && verb.eq_ignore_ascii_case(MAIL)
        {
            Some(AUTHENTICATION_REQUIRED.clone())
        } else {
            None
        }
    }

    fn message_received(&mut self, envelope: Envelope) -> anyhow::Result<String> {
        let message = Message::parse(envelope, &self.hostname);
        let id = message.id.clone();
        self.logger.log(format_args!("Storing message {}", id));
        (self.handler)(message)?;
        Ok(id)
    }
}
