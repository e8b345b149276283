use crate::transport::Handshake;
use std::fmt::Display;

/// Status code sent when the client quits. Replies with this code end the session.
pub const QUIT_CODE: u16 = 221;

/// Response to indicate that the SMTP session finished
pub const GOODBYE: Reply = Reply::fixed(QUIT_CODE, "Goodbye");
/// Authentication succeeded
pub const AUTH_OK: Reply = Reply::fixed(235, "Authentication successful");
/// OK response
pub const OK: Reply = Reply::fixed(250, "OK");
// Non-commital response to VERIFY command
pub(crate) const VERIFY_RESPONSE: Reply = Reply::fixed(252, "Maybe");
// Empty response sent as an auth challenge.
pub(crate) const EMPTY_AUTH_CHALLENGE: Reply = Reply::fixed(334, "");
/// Response sent to the client before accepting data
pub const START_DATA: Reply = Reply::fixed(354, "Start mail input; end with <CRLF>.<CRLF>");
// Sent before the TLS handshake starts
pub(crate) const START_TLS: Reply = Reply::fixed(220, "Ready to start TLS");
// State machine is not accepting commands
pub(crate) const INVALID_STATE: Reply =
    Reply::fixed(421, "Internal service error, closing connection");
/// STARTTLS requested but no certificate is configured
pub const TLS_UNAVAILABLE: Reply = Reply::fixed(454, "TLS not available");
/// An unterminated line outgrew the line limit
pub const LINE_TOO_LONG: Reply = Reply::fixed(500, "Line too long");
// Parser error
pub(crate) const SYNTAX_ERROR: Reply = Reply::fixed(500, "Syntax error");
// Parser found missing parameter
pub(crate) const MISSING_PARAMETER: Reply = Reply::fixed(501, "Missing parameter");
/// Command is unexpected for the current state
pub const BAD_SEQUENCE_COMMANDS: Reply = Reply::fixed(503, "Bad sequence of commands");
/// Authentication mechanism not offered
pub const UNSUPPORTED_MECHANISM: Reply = Reply::fixed(504, "Unrecognized authentication type");
/// Authentication required
pub const AUTHENTICATION_REQUIRED: Reply = Reply::fixed(530, "Authentication required");
/// Bad authentication attempt
pub const INVALID_CREDENTIALS: Reply = Reply::fixed(535, "Invalid credentials");
/// The message outgrew the size limit
pub const MESSAGE_TOO_BIG: Reply = Reply::fixed(552, "Message exceeds fixed maximum message size");
/// Error handling incoming message
pub const TRANSACTION_FAILED: Reply = Reply::fixed(554, "Transaction failed");

/// A reply to be written back to the client.
///
/// A reply is one or more text lines sharing a status code. It may carry a
/// [`Handshake`] that the session runs once the reply has been written.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// The three digit reply code
    pub code: u16,
    text: Text,
    handshake: Option<Handshake>,
}

#[derive(Clone, Debug, PartialEq)]
enum Text {
    Fixed(&'static str),
    Custom(String),
    Multi(Vec<String>),
}

impl Reply {
    // A reply that uses a fixed static string
    pub(crate) const fn fixed(code: u16, message: &'static str) -> Self {
        Self {
            code,
            text: Text::Fixed(message),
            handshake: None,
        }
    }

    /// Create an application defined single line reply.
    pub fn custom<S: Into<String>>(code: u16, message: S) -> Self {
        Self {
            code,
            text: Text::Custom(message.into()),
            handshake: None,
        }
    }

    /// Create a reply spanning several lines, sent with continuation markers.
    pub fn multiline<I, S>(code: u16, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code,
            text: Text::Multi(lines.into_iter().map(Into::into).collect()),
            handshake: None,
        }
    }

    /// Create a reply whose text is the display form of an error.
    pub fn error(code: u16, err: impl Display) -> Self {
        Self::custom(code, err.to_string())
    }

    /// Attach a TLS handshake to run after this reply is sent.
    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Remove the handshake attached to this reply, if any.
    pub fn take_handshake(&mut self) -> Option<Handshake> {
        self.handshake.take()
    }

    /// Is this an error reply?
    pub fn is_error(&self) -> bool {
        self.code < 200 || self.code >= 400
    }

    /// Does this reply end the session once it is sent?
    pub fn is_terminal(&self) -> bool {
        self.code == QUIT_CODE
    }

    /// The lines of this reply, each terminated by CRLF and ready to send.
    pub fn lines(&self) -> Vec<String> {
        match &self.text {
            Text::Fixed(s) => vec![format!("{} {}\r\n", self.code, s)],
            Text::Custom(s) => vec![format!("{} {}\r\n", self.code, s)],
            Text::Multi(lines) if lines.is_empty() => vec![format!("{} \r\n", self.code)],
            Text::Multi(lines) => {
                let last = lines.len() - 1;
                lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| {
                        let sep = if i == last { ' ' } else { '-' };
                        format!("{}{}{}\r\n", self.code, sep, line)
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn single_line() {
        assert_eq!(OK.lines(), vec!["250 OK\r\n".to_string()]);
        assert_eq!(EMPTY_AUTH_CHALLENGE.lines(), vec!["334 \r\n".to_string()]);
    }

    #[test]
    fn multiline_continuation() {
        let reply = Reply::multiline(250, vec!["mx.example.org", "8BITMIME", "STARTTLS"]);
        expect![[r#"
            [
                "250-mx.example.org\r\n",
                "250-8BITMIME\r\n",
                "250 STARTTLS\r\n",
            ]
        "#]]
        .assert_debug_eq(&reply.lines());
    }

    #[test]
    fn terminal_is_exact_match() {
        assert!(GOODBYE.is_terminal());
        assert!(!INVALID_STATE.is_terminal());
        assert!(!Reply::custom(220, "Goodbye").is_terminal());
        assert!(Reply::custom(221, "Bye now").is_terminal());
    }

    #[test]
    fn error_classes() {
        assert!(!OK.is_error());
        assert!(!START_DATA.is_error());
        assert!(AUTHENTICATION_REQUIRED.is_error());
        assert!(TLS_UNAVAILABLE.is_error());
    }
}
