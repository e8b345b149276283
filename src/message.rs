use crate::protocol::Envelope;
use nom::bytes::complete::{tag, take_while1};
use nom::combinator::rest;
use nom::sequence::separated_pair;
use nom::IResult;
use std::borrow::Cow;
use uuid::Uuid;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// A received message, as handed to the application.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Identifier assigned by this server, `<uuid>@<hostname>`
    pub id: String,
    /// Domain given by the client in HELO/EHLO
    pub helo: String,
    /// Envelope sender
    pub from: String,
    /// Envelope recipients, in the order they were accepted
    pub to: Vec<String>,
    /// Header fields in order of appearance, folded lines joined
    pub headers: Vec<(String, String)>,
    /// Everything after the blank line that ends the headers, byte for byte
    pub body: Vec<u8>,
    /// Did the client announce 8BITMIME content?
    pub is8bit: bool,
}

impl Message {
    /// Finalize a message received by `hostname`.
    ///
    /// Adds trace headers and a `Message-ID` when the client did not send one.
    pub fn parse(envelope: Envelope, hostname: &str) -> Self {
        let id = new_id(hostname);
        let data = envelope.data;
        let header_end = data.windows(HEADER_END.len()).position(|w| w == HEADER_END);
        let (mut headers, body) = match header_end {
            Some(end) => (
                parse_headers(&String::from_utf8_lossy(&data[..end])),
                data[end + HEADER_END.len()..].to_vec(),
            ),
            None if data.starts_with(b"\r\n") => (Vec::new(), data[2..].to_vec()),
            None => (Vec::new(), data),
        };

        let mut trace = vec![
            ("Return-Path".to_string(), format!("<{}>", envelope.from)),
            (
                "Received".to_string(),
                format!("from {} by {} (smtpserve); id {}", envelope.helo, hostname, id),
            ),
        ];
        trace.append(&mut headers);
        let mut headers = trace;
        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("Message-ID"))
        {
            headers.push(("Message-ID".to_string(), format!("<{}>", id)));
        }

        Self {
            id,
            helo: envelope.helo,
            from: envelope.from,
            to: envelope.to,
            headers,
            body,
            is8bit: envelope.is8bit,
        }
    }

    /// The body as text, with invalid UTF-8 replaced
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// The first header with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Create a new message identifier for the given host
pub fn new_id(hostname: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), hostname)
}

fn field(line: &str) -> IResult<&str, (&str, &str)> {
    let name = take_while1(|c: char| c.is_ascii_graphic() && c != ':');
    separated_pair(name, tag(":"), rest)(line)
}

fn parse_headers(head: &str) -> Vec<(String, String)> {
    let mut unfolded: Vec<String> = Vec::new();
    for line in head.split("\r\n") {
        match unfolded.last_mut() {
            Some(last) if line.starts_with(' ') || line.starts_with('\t') => {
                last.push(' ');
                last.push_str(line.trim_start());
            }
            _ => unfolded.push(line.to_string()),
        }
    }
    unfolded
        .iter()
        .filter_map(|line| field(line).ok())
        .map(|(_, (name, value))| (name.to_string(), value.trim().to_string()))
        .collect()
}
