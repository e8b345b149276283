use crate::protocol::parser::{decode_sasl_plain, parse, parse_auth_response, split_verb, Cmd};
use crate::protocol::reply::*;
use crate::protocol::{AuthOutcome, Envelope, Hooks, Protocol, TlsOutcome};
use either::*;
use log::{error, trace};
use std::borrow::BorrowMut;
use ternop::ternary;

const PLAIN: &str = "PLAIN";

/// Largest message accepted by default, in bytes
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[cfg(test)]
#[derive(Debug)]
pub(crate) enum SmtpState {
    Invalid,
    Idle,
    Hello,
    Auth,
    Mail,
    Rcpt,
    Data,
}

#[derive(PartialEq, Debug)]
enum TlsState {
    Inactive,
    Negotiating,
    Active,
}

trait State {
    #[cfg(test)]
    fn id(&self) -> SmtpState;

    // Handle an incoming command and return the next state
    fn handle(
        self: Box<Self>,
        fsm: &mut Machine,
        hooks: &mut dyn Hooks,
        cmd: Cmd,
    ) -> (Reply, Option<Box<dyn State>>);

    // Most states convert an input line into a command after offering it to
    // the command filter. Some states, e.g Data, need to process input lines
    // differently and will override this method.
    fn process_line<'a>(
        &mut self,
        hooks: &mut dyn Hooks,
        line: &'a [u8],
    ) -> Either<Cmd<'a>, Option<Reply>> {
        trace!("> {}", String::from_utf8_lossy(line).trim_end());
        if let Some((verb, args)) = split_verb(line) {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if let Some(reply) = hooks.filter_command(&verb, &args) {
                return Right(Some(reply));
            }
        }
        parse(line).map(Left).unwrap_or_else(|reply| Right(Some(reply)))
    }
}

//------------------------------------------------------------------------------

// Convert the current state to the next state depending on the reply
fn transform_state<S, F>(
    current: Box<S>,
    reply: Reply,
    next_state: F,
) -> (Reply, Option<Box<dyn State>>)
where
    S: State + 'static,
    F: FnOnce(S) -> Box<dyn State>,
{
    if reply.is_terminal() {
        (reply, None)
    } else if reply.is_error() {
        (reply, Some(current))
    } else {
        (reply, Some(next_state(*current)))
    }
}

fn default_handler(
    current: Box<dyn State>,
    fsm: &Machine,
    hooks: &mut dyn Hooks,
    cmd: &Cmd,
) -> (Reply, Option<Box<dyn State>>) {
    match *cmd {
        Cmd::Quit => (GOODBYE.clone(), None),
        Cmd::Noop => (OK.clone(), Some(current)),
        Cmd::Helo { domain } => hello(domain, OK.clone()),
        Cmd::Ehlo { domain } => hello(domain, fsm.ehlo_response(hooks, domain)),
        _ => unhandled(current),
    }
}

fn unhandled(current: Box<dyn State>) -> (Reply, Option<Box<dyn State>>) {
    (BAD_SEQUENCE_COMMANDS.clone(), Some(current))
}

// HELO and EHLO always start a fresh transaction
fn hello(domain: &str, reply: Reply) -> (Reply, Option<Box<dyn State>>) {
    (
        reply,
        Some(Box::new(Hello {
            domain: domain.to_owned(),
        })),
    )
}

fn handle_start_tls(
    current: Box<dyn State>,
    fsm: &mut Machine,
    hooks: &mut dyn Hooks,
) -> (Reply, Option<Box<dyn State>>) {
    if fsm.tls != TlsState::Inactive {
        return unhandled(current);
    }
    match hooks.start_tls() {
        TlsOutcome::Rejected(reply) => (reply, Some(current)),
        TlsOutcome::Deferred(handshake) => {
            fsm.tls = TlsState::Negotiating;
            // The client has to say EHLO again over the encrypted channel
            (
                START_TLS.clone().with_handshake(handshake),
                Some(Box::new(Idle {})),
            )
        }
    }
}

fn handle_auth(
    current: Box<Hello>,
    fsm: &mut Machine,
    hooks: &mut dyn Hooks,
    mechanism: &str,
    initial: Option<&[u8]>,
) -> (Reply, Option<Box<dyn State>>) {
    if fsm.authenticated {
        return unhandled(current);
    }
    let offered = hooks
        .auth_mechanisms()
        .iter()
        .any(|m| m.eq_ignore_ascii_case(mechanism));
    if !offered || !mechanism.eq_ignore_ascii_case(PLAIN) {
        return (UNSUPPORTED_MECHANISM.clone(), Some(current));
    }
    match initial {
        Some(response) => {
            let reply = authenticate(fsm, hooks, response);
            (reply, Some(current))
        }
        None => (
            EMPTY_AUTH_CHALLENGE.clone(),
            Some(Box::new(Auth {
                domain: current.domain,
            })),
        ),
    }
}

fn authenticate(fsm: &mut Machine, hooks: &mut dyn Hooks, response: &[u8]) -> Reply {
    let args = decode_sasl_plain(response);
    match hooks.validate_auth(PLAIN, &args) {
        AuthOutcome::Accepted => {
            fsm.authenticated = true;
            AUTH_OK.clone()
        }
        AuthOutcome::Rejected(reply) => reply,
    }
}

//------------------------------------------------------------------------------

struct Idle {}

impl State for Idle {
    #[cfg(test)]
    fn id(&self) -> SmtpState {
        SmtpState::Idle
    }

    fn handle(
        self: Box<Self>,
        fsm: &mut Machine,
        hooks: &mut dyn Hooks,
        cmd: Cmd,
    ) -> (Reply, Option<Box<dyn State>>) {
        match cmd {
            Cmd::Rset => (OK.clone(), Some(self)),
            _ => default_handler(self, fsm, hooks, &cmd),
        }
    }
}

//------------------------------------------------------------------------------

struct Hello {
    domain: String,
}

impl State for Hello {
    #[cfg(test)]
    fn id(&self) -> SmtpState {
        SmtpState::Hello
    }

    fn handle(
        self: Box<Self>,
        fsm: &mut Machine,
        hooks: &mut dyn Hooks,
        cmd: Cmd,
    ) -> (Reply, Option<Box<dyn State>>) {
        match cmd {
            Cmd::Mail {
                reverse_path,
                is8bit,
            } => transform_state(self, OK.clone(), |s| {
                Box::new(Mail {
                    domain: s.domain,
                    reverse_path: reverse_path.to_owned(),
                    is8bit,
                })
            }),
            Cmd::StartTls => handle_start_tls(self, fsm, hooks),
            Cmd::Auth { mechanism, initial } => handle_auth(self, fsm, hooks, mechanism, initial),
            Cmd::Vrfy => (VERIFY_RESPONSE.clone(), Some(self)),
            Cmd::Rset => (OK.clone(), Some(self)),
            _ => default_handler(self, fsm, hooks, &cmd),
        }
    }
}

//------------------------------------------------------------------------------

struct Auth {
    domain: String,
}

impl State for Auth {
    #[cfg(test)]
    fn id(&self) -> SmtpState {
        SmtpState::Auth
    }

    fn handle(
        self: Box<Self>,
        fsm: &mut Machine,
        hooks: &mut dyn Hooks,
        cmd: Cmd,
    ) -> (Reply, Option<Box<dyn State>>) {
        let next: Box<dyn State> = Box::new(Hello {
            domain: self.domain.clone(),
        });
        match cmd {
            Cmd::AuthResponse { response } => (authenticate(fsm, hooks, response), Some(next)),
            Cmd::AuthCancel => (
                Reply::custom(501, "Authentication cancelled"),
                Some(next),
            ),
            _ => unhandled(self),
        }
    }

    // The line after a 334 challenge is a bare SASL response, not a command
    fn process_line<'a>(
        &mut self,
        _hooks: &mut dyn Hooks,
        line: &'a [u8],
    ) -> Either<Cmd<'a>, Option<Reply>> {
        trace!("> _auth_");
        if line == b"*\r\n" {
            return Left(Cmd::AuthCancel);
        }
        match parse_auth_response(line) {
            Ok(response) => Left(Cmd::AuthResponse { response }),
            // An undecodable response still ends the exchange
            Err(_) => Left(Cmd::AuthResponse { response: b"" }),
        }
    }
}

//------------------------------------------------------------------------------

struct Mail {
    domain: String,
    reverse_path: String,
    is8bit: bool,
}

impl State for Mail {
    #[cfg(test)]
    fn id(&self) -> SmtpState {
        SmtpState::Mail
    }

    fn handle(
        self: Box<Self>,
        fsm: &mut Machine,
        hooks: &mut dyn Hooks,
        cmd: Cmd,
    ) -> (Reply, Option<Box<dyn State>>) {
        match cmd {
            Cmd::Rcpt { forward_path } => transform_state(self, OK.clone(), |s| {
                Box::new(Rcpt {
                    domain: s.domain,
                    reverse_path: s.reverse_path,
                    is8bit: s.is8bit,
                    forward_path: vec![forward_path.to_owned()],
                })
            }),
            Cmd::Rset => hello(&self.domain, OK.clone()),
            _ => default_handler(self, fsm, hooks, &cmd),
        }
    }
}

//------------------------------------------------------------------------------

struct Rcpt {
    domain: String,
    reverse_path: String,
    is8bit: bool,
    forward_path: Vec<String>,
}

impl State for Rcpt {
    #[cfg(test)]
    fn id(&self) -> SmtpState {
        SmtpState::Rcpt
    }

    fn handle(
        self: Box<Self>,
        fsm: &mut Machine,
        hooks: &mut dyn Hooks,
        cmd: Cmd,
    ) -> (Reply, Option<Box<dyn State>>) {
        match cmd {
            Cmd::Data => {
                let limit = fsm.max_message_size;
                transform_state(self, START_DATA.clone(), |s| {
                    Box::new(Data {
                        domain: s.domain,
                        reverse_path: s.reverse_path,
                        is8bit: s.is8bit,
                        forward_path: s.forward_path,
                        data: Vec::with_capacity(4096),
                        limit,
                        oversized: false,
                    })
                })
            }
            Cmd::Rcpt { forward_path } => transform_state(self, OK.clone(), |s| {
                let mut fp = s.forward_path;
                fp.push(forward_path.to_owned());
                Box::new(Rcpt {
                    domain: s.domain,
                    reverse_path: s.reverse_path,
                    is8bit: s.is8bit,
                    forward_path: fp,
                })
            }),
            Cmd::Rset => hello(&self.domain, OK.clone()),
            _ => default_handler(self, fsm, hooks, &cmd),
        }
    }
}

//------------------------------------------------------------------------------

struct Data {
    domain: String,
    reverse_path: String,
    is8bit: bool,
    forward_path: Vec<String>,
    data: Vec<u8>,
    limit: usize,
    // Set once the data passed the limit, the rest is dropped
    oversized: bool,
}

impl State for Data {
    #[cfg(test)]
    fn id(&self) -> SmtpState {
        SmtpState::Data
    }

    fn handle(
        self: Box<Self>,
        _fsm: &mut Machine,
        hooks: &mut dyn Hooks,
        cmd: Cmd,
    ) -> (Reply, Option<Box<dyn State>>) {
        match cmd {
            Cmd::DataEnd if self.oversized => hello(&self.domain, MESSAGE_TOO_BIG.clone()),
            Cmd::DataEnd => {
                let s = *self;
                let envelope = Envelope {
                    helo: s.domain.clone(),
                    from: s.reverse_path,
                    to: s.forward_path,
                    data: s.data,
                    is8bit: s.is8bit,
                };
                let reply = match hooks.message_received(envelope) {
                    Ok(id) => Reply::custom(250, format!("Ok: queued as {}", id)),
                    Err(e) => {
                        error!("Error accepting message: {}", e);
                        Reply::custom(554, format!("Transaction failed: {}", e))
                    }
                };
                hello(&s.domain, reply)
            }
            _ => unhandled(self),
        }
    }

    fn process_line<'a>(
        &mut self,
        _hooks: &mut dyn Hooks,
        mut line: &'a [u8],
    ) -> Either<Cmd<'a>, Option<Reply>> {
        if line == b".\r\n" {
            trace!("> _data_");
            Left(Cmd::DataEnd)
        } else {
            if line.starts_with(b".") {
                line = &line[1..];
            }
            if self.oversized {
                return Right(None);
            }
            if self.data.len() + line.len() > self.limit {
                self.oversized = true;
                self.data = Vec::new();
            } else {
                self.data.extend_from_slice(line);
            }
            Right(None)
        }
    }
}

//------------------------------------------------------------------------------

/// The bundled SMTP state machine.
///
/// Handles HELO, EHLO, MAIL, RCPT, DATA, RSET, NOOP, VRFY, QUIT, STARTTLS and
/// AUTH PLAIN, one line at a time.
pub struct Machine {
    hostname: String,
    tls: TlsState,
    authenticated: bool,
    max_message_size: usize,
    smtp: Option<Box<dyn State>>,
}

impl Machine {
    /// Create a state machine for a server known as `hostname`
    pub fn new<S: Into<String>>(hostname: S) -> Self {
        Self {
            hostname: hostname.into(),
            tls: TlsState::Inactive,
            authenticated: false,
            max_message_size: MAX_MESSAGE_SIZE,
            smtp: Some(Box::new(Idle {})),
        }
    }

    /// Reject messages whose data is larger than `size` bytes
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    // Respond and change state with the given command
    fn command(&mut self, hooks: &mut dyn Hooks, cmd: Cmd) -> Reply {
        let (reply, next_state) = match self.smtp.take() {
            Some(last_state) => last_state.handle(self, hooks, cmd),
            None => (INVALID_STATE.clone(), None),
        };
        self.smtp = next_state;
        reply
    }

    fn process_line<'a>(
        &mut self,
        hooks: &mut dyn Hooks,
        line: &'a [u8],
    ) -> Either<Cmd<'a>, Option<Reply>> {
        match self.smtp {
            Some(ref mut s) => {
                let s: &mut dyn State = s.borrow_mut();
                s.process_line(hooks, line)
            }
            None => Right(Some(INVALID_STATE.clone())),
        }
    }

    #[cfg(test)]
    pub(crate) fn current_state(&self) -> SmtpState {
        let id = self.smtp.as_ref().map(|s| s.id());
        id.unwrap_or(SmtpState::Invalid)
    }

    fn ehlo_response(&self, hooks: &dyn Hooks, domain: &str) -> Reply {
        let mut lines = vec![
            format!("{} greets {}", self.hostname, domain),
            "8BITMIME".to_string(),
        ];
        if self.tls == TlsState::Inactive && hooks.supports_tls() {
            lines.push("STARTTLS".to_string());
        }
        let mechanisms = hooks.auth_mechanisms();
        if !mechanisms.is_empty() {
            lines.push(format!("AUTH {}", mechanisms.join(" ")));
        }
        Reply::multiline(250, lines)
    }
}

impl Protocol for Machine {
    fn start(&mut self) -> Reply {
        Reply::custom(220, format!("{} ESMTP", self.hostname))
    }

    fn parse<'a>(
        &mut self,
        input: &'a [u8],
        hooks: &mut dyn Hooks,
    ) -> (&'a [u8], Option<Reply>) {
        let end = match input.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => pos + 2,
            None => return (input, None),
        };
        let (line, rest) = input.split_at(end);
        let reply = match self.process_line(hooks, line) {
            Left(cmd) => Some(self.command(hooks, cmd)),
            Right(reply) => reply,
        };
        (rest, reply)
    }

    fn tls_negotiated(&mut self, ok: bool) {
        self.tls = ternary!(ok, TlsState::Active, TlsState::Inactive);
    }
}

//----- Tests ------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::testing::self_signed;
    use crate::transport::Handshake;
    use anyhow::anyhow;
    use expect_test::expect;

    // Check that the state machine matches the given state pattern
    macro_rules! assert_state {
        ($val:expr, $n:pat ) => {{
            assert!(
                match $val {
                    $n => true,
                    _ => false,
                },
                "{:?} !~ {}",
                $val,
                stringify!($n)
            )
        }};
    }

    #[derive(Default)]
    struct TestHooks {
        tls: bool,
        auth: bool,
        require_auth: bool,
        authenticated: bool,
        fail_delivery: bool,
        received: Vec<Envelope>,
    }

    impl Hooks for TestHooks {
        fn supports_tls(&self) -> bool {
            self.tls
        }

        fn start_tls(&mut self) -> TlsOutcome {
            if self.tls {
                TlsOutcome::Deferred(Handshake::new(self_signed()))
            } else {
                TlsOutcome::Rejected(TLS_UNAVAILABLE.clone())
            }
        }

        fn auth_mechanisms(&self) -> Vec<&'static str> {
            ternary!(self.auth, vec![PLAIN], vec![])
        }

        fn validate_auth(&mut self, _mechanism: &str, args: &[String]) -> AuthOutcome {
            if args.len() == 2 && args[0] == "test" && args[1] == "1234" {
                self.authenticated = true;
                AuthOutcome::Accepted
            } else {
                AuthOutcome::Rejected(INVALID_CREDENTIALS.clone())
            }
        }

        fn filter_command(&mut self, verb: &str, _args: &[&str]) -> Option<Reply> {
            if self.require_auth && !self.authenticated && verb == "MAIL" {
                Some(AUTHENTICATION_REQUIRED.clone())
            } else {
                None
            }
        }

        fn message_received(&mut self, envelope: Envelope) -> anyhow::Result<String> {
            if self.fail_delivery {
                return Err(anyhow!("disk full"));
            }
            self.received.push(envelope);
            Ok(format!("{}@some.name", self.received.len()))
        }
    }

    struct Harness {
        machine: Machine,
        hooks: TestHooks,
    }

    impl Harness {
        fn new(hooks: TestHooks) -> Self {
            Self {
                machine: Machine::new("some.name"),
                hooks,
            }
        }

        fn process(&mut self, line: &[u8]) -> Option<Reply> {
            let (rest, reply) = self.machine.parse(line, &mut self.hooks);
            assert!(rest.is_empty());
            reply
        }

        fn code(&mut self, line: &[u8]) -> u16 {
            self.process(line).map(|r| r.code).unwrap_or(0)
        }
    }

    fn new_session() -> Harness {
        Harness::new(TestHooks::default())
    }

    #[test]
    fn greeting() {
        let mut machine = Machine::new("mx.example.org");
        assert_eq!(machine.start().lines(), vec!["220 mx.example.org ESMTP\r\n"]);
    }

    #[test]
    fn one_line_at_a_time() {
        let mut machine = Machine::new("some.name");
        let mut hooks = TestHooks::default();
        let (rest, reply) = machine.parse(b"noop\r\nrset\r\nhel", &mut hooks);
        assert_eq!(rest, b"rset\r\nhel");
        assert_eq!(reply.map(|r| r.code), Some(250));
        let (rest, reply) = machine.parse(b"hel", &mut hooks);
        assert_eq!(rest, b"hel");
        assert!(reply.is_none());
    }

    #[test]
    fn helo_ehlo() {
        let mut session = new_session();
        assert_eq!(session.code(b"helo a.domain\r\n"), 250);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
        assert_eq!(session.code(b"ehlo b.domain\r\n"), 250);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn ehlo_extensions() {
        let mut session = Harness::new(TestHooks {
            tls: true,
            auth: true,
            ..Default::default()
        });
        let reply = session.process(b"EHLO client.example.org\r\n").unwrap();
        expect![[r#"
            [
                "250-some.name greets client.example.org\r\n",
                "250-8BITMIME\r\n",
                "250-STARTTLS\r\n",
                "250 AUTH PLAIN\r\n",
            ]
        "#]]
        .assert_debug_eq(&reply.lines());
    }

    #[test]
    fn mail_from() {
        let mut session = new_session();
        session.process(b"helo a.domain\r\n");
        assert_eq!(session.code(b"mail from:<ship@sea.com>\r\n"), 250);
        assert_state!(session.machine.current_state(), SmtpState::Mail);
    }

    #[test]
    fn mail_before_helo() {
        let mut session = new_session();
        assert_eq!(session.code(b"mail from:<ship@sea.com>\r\n"), 503);
        assert_state!(session.machine.current_state(), SmtpState::Idle);
    }

    #[test]
    fn domain_badchars() {
        let mut session = new_session();
        assert_eq!(session.code(b"helo world\x40\xff\r\n"), 500);
        assert_state!(session.machine.current_state(), SmtpState::Idle);
    }

    #[test]
    fn rcpt_to() {
        let mut session = new_session();
        session.process(b"helo a.domain\r\n");
        session.process(b"mail from:<ship@sea.com>\r\n");
        assert_eq!(session.code(b"rcpt to:<fish@sea.com>\r\n"), 250);
        assert_eq!(session.code(b"rcpt to:<kraken@sea.com>\r\n"), 250);
        assert_state!(session.machine.current_state(), SmtpState::Rcpt);
    }

    #[test]
    fn data() {
        let mut session = new_session();
        session.process(b"helo a.domain\r\n");
        session.process(b"mail from:<ship@sea.com>\r\n");
        session.process(b"rcpt to:<fish@sea.com>\r\n");
        session.process(b"rcpt to:<kraken@sea.com>\r\n");
        assert_eq!(session.code(b"data\r\n"), 354);
        assert!(session.process(b"Hello World\r\n").is_none());
        assert!(session.process(b"..\r\n").is_none());
        let reply = session.process(b".\r\n").unwrap();
        assert_eq!(reply.lines(), vec!["250 Ok: queued as 1@some.name\r\n"]);
        assert_state!(session.machine.current_state(), SmtpState::Hello);

        let envelope = &session.hooks.received[0];
        assert_eq!(envelope.helo, "a.domain");
        assert_eq!(envelope.from, "ship@sea.com");
        assert_eq!(envelope.to, vec!["fish@sea.com", "kraken@sea.com"]);
        assert_eq!(envelope.data, b"Hello World\r\n.\r\n");
    }

    #[test]
    fn data_8bit() {
        let mut session = new_session();
        session.process(b"helo a.domain\r\n");
        session.process(b"mail from:<ship@sea.com> body=8bitmime\r\n");
        session.process(b"rcpt to:<fish@sea.com>\r\n");
        assert_eq!(session.code(b"data\r\n"), 354);
        // Send illegal utf-8 but valid 8bit mime
        assert!(session.process(b"Hello 8bit world \x40\x7f\r\n").is_none());
        assert_eq!(session.code(b".\r\n"), 250);
        assert!(session.hooks.received[0].is8bit);
    }

    #[test]
    fn oversized_message() {
        let mut session = new_session();
        session.machine = Machine::new("some.name").with_max_message_size(16);
        session.process(b"helo a.domain\r\n");
        session.process(b"mail from:<ship@sea.com>\r\n");
        session.process(b"rcpt to:<fish@sea.com>\r\n");
        session.process(b"data\r\n");
        assert!(session.process(b"0123456789\r\n").is_none());
        assert!(session.process(b"0123456789\r\n").is_none());
        assert!(session.process(b"tail\r\n").is_none());
        let reply = session.process(b".\r\n").unwrap();
        assert_eq!(
            reply.lines(),
            vec!["552 Message exceeds fixed maximum message size\r\n"]
        );
        assert!(session.hooks.received.is_empty());
        assert_state!(session.machine.current_state(), SmtpState::Hello);

        // The next transaction starts from scratch
        session.process(b"mail from:<ship@sea.com>\r\n");
        session.process(b"rcpt to:<fish@sea.com>\r\n");
        session.process(b"data\r\n");
        session.process(b"short\r\n");
        assert_eq!(session.code(b".\r\n"), 250);
        assert_eq!(session.hooks.received[0].data, b"short\r\n");
    }

    #[test]
    fn delivery_failure() {
        let mut session = Harness::new(TestHooks {
            fail_delivery: true,
            ..Default::default()
        });
        session.process(b"helo a.domain\r\n");
        session.process(b"mail from:<ship@sea.com>\r\n");
        session.process(b"rcpt to:<fish@sea.com>\r\n");
        session.process(b"data\r\n");
        session.process(b"Hello\r\n");
        let reply = session.process(b".\r\n").unwrap();
        assert_eq!(reply.lines(), vec!["554 Transaction failed: disk full\r\n"]);
        assert!(session.hooks.received.is_empty());
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn rset_hello() {
        let mut session = new_session();
        session.process(b"helo some.domain\r\n");
        session.process(b"mail from:<ship@sea.com>\r\n");
        assert_eq!(session.code(b"rset\r\n"), 250);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn rset_idle() {
        let mut session = new_session();
        assert_eq!(session.code(b"rset\r\n"), 250);
        assert_state!(session.machine.current_state(), SmtpState::Idle);
    }

    #[test]
    fn quit() {
        let mut session = new_session();
        session.process(b"helo a.domain\r\n");
        session.process(b"mail from:<ship@sea.com>\r\n");
        let reply = session.process(b"quit\r\n").unwrap();
        assert_eq!(reply.code, 221);
        assert!(reply.is_terminal());
        assert_state!(session.machine.current_state(), SmtpState::Invalid);
        assert_eq!(session.code(b"noop\r\n"), 421);
    }

    #[test]
    fn vrfy() {
        let mut session = new_session();
        session.process(b"helo a.domain\r\n");
        assert_eq!(session.code(b"vrfy kraken\r\n"), 252);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
        session.process(b"mail from:<ship@sea.com>\r\n");
        assert_eq!(session.code(b"vrfy boat\r\n"), 503);
        assert_state!(session.machine.current_state(), SmtpState::Mail);
    }

    fn new_auth_session() -> Harness {
        Harness::new(TestHooks {
            auth: true,
            require_auth: true,
            ..Default::default()
        })
    }

    #[test]
    fn noauth_denied() {
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        assert_eq!(session.code(b"mail from:<ship@sea.com>\r\n"), 530);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn noauth_denied_with_binary_arguments() {
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        assert_eq!(session.code(b"mail from:<\xff\xfe@sea.com>\r\n"), 530);
        assert_eq!(session.code(b"MAIL\r\n"), 530);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn auth_plain_param() {
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        assert_eq!(session.code(b"auth plain dGVzdAB0ZXN0ADEyMzQ=\r\n"), 235);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
        assert_eq!(session.code(b"mail from:<ship@sea.com>\r\n"), 250);
        // A second AUTH is out of sequence
        assert_eq!(session.code(b"rset\r\n"), 250);
        assert_eq!(session.code(b"auth plain dGVzdAB0ZXN0ADEyMzQ=\r\n"), 503);
    }

    #[test]
    fn bad_auth_plain_param() {
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        assert_eq!(session.code(b"auth plain eGVzdAB0ZXN0ADEyMzQ=\r\n"), 535);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
        assert_eq!(session.code(b"mail from:<ship@sea.com>\r\n"), 530);
    }

    #[test]
    fn auth_plain_challenge() {
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        let reply = session.process(b"auth plain\r\n").unwrap();
        assert_eq!(reply, EMPTY_AUTH_CHALLENGE);
        assert_state!(session.machine.current_state(), SmtpState::Auth);
        assert_eq!(session.code(b"dGVzdAB0ZXN0ADEyMzQ=\r\n"), 235);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn bad_auth_plain_challenge() {
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        session.process(b"auth plain\r\n");
        assert_eq!(session.code(b"eGVzdAB0ZXN0ADEyMzQ=\r\n"), 535);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn cancelled_auth_challenge() {
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        session.process(b"auth plain\r\n");
        assert_eq!(session.code(b"*\r\n"), 501);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }

    #[test]
    fn auth_not_offered() {
        let mut session = new_session();
        session.process(b"ehlo a.domain\r\n");
        assert_eq!(session.code(b"auth plain dGVzdAB0ZXN0ADEyMzQ=\r\n"), 504);
        let mut session = new_auth_session();
        session.process(b"ehlo a.domain\r\n");
        assert_eq!(session.code(b"auth login\r\n"), 504);
    }

    #[test]
    fn start_tls() {
        let mut session = Harness::new(TestHooks {
            tls: true,
            ..Default::default()
        });
        session.process(b"ehlo a.domain\r\n");
        let mut reply = session.process(b"starttls\r\n").unwrap();
        assert_eq!(reply.code, 220);
        assert!(reply.take_handshake().is_some());
        assert_state!(session.machine.current_state(), SmtpState::Idle);

        session.machine.tls_negotiated(true);
        let reply = session.process(b"ehlo a.domain\r\n").unwrap();
        assert!(!reply.lines().iter().any(|l| l.contains("STARTTLS")));
        assert_eq!(session.code(b"starttls\r\n"), 503);
    }

    #[test]
    fn start_tls_failed_handshake() {
        let mut session = Harness::new(TestHooks {
            tls: true,
            ..Default::default()
        });
        session.process(b"ehlo a.domain\r\n");
        session.process(b"starttls\r\n");
        session.machine.tls_negotiated(false);
        let reply = session.process(b"ehlo a.domain\r\n").unwrap();
        assert!(reply.lines().iter().any(|l| l.contains("STARTTLS")));
    }

    #[test]
    fn start_tls_unavailable() {
        let mut session = new_session();
        session.process(b"ehlo a.domain\r\n");
        let reply = session.process(b"starttls\r\n").unwrap();
        assert_eq!(reply, TLS_UNAVAILABLE);
        assert_state!(session.machine.current_state(), SmtpState::Hello);
    }
}
