use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, tag_no_case, take_while1};
use nom::character::complete::space0;
use nom::character::is_alphanumeric;
use nom::combinator::{map, map_res, opt, value};
use nom::sequence::{pair, preceded, separated_pair, terminated};
use nom::IResult;
use std::str;

use crate::protocol::reply::*;

// Smtp commands sent by the client
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Cmd<'a> {
    Ehlo {
        domain: &'a str,
    },
    Helo {
        domain: &'a str,
    },
    Mail {
        reverse_path: &'a str,
        is8bit: bool,
    },
    Rcpt {
        forward_path: &'a str,
    },
    Data,
    Rset,
    Noop,
    StartTls,
    Quit,
    Vrfy,
    Auth {
        mechanism: &'a str,
        initial: Option<&'a [u8]>,
    },
    // Dummy command containing client authentication
    AuthResponse {
        response: &'a [u8],
    },
    // Dummy command sent when the client aborts an authentication exchange
    AuthCancel,
    // Dummy command to signify end of data
    DataEnd,
}

//----- Parser -----------------------------------------------------------------

// Parse a line from the client
pub(crate) fn parse(line: &[u8]) -> Result<Cmd, Reply> {
    command(line).map(|r| r.1).map_err(|e| match e {
        nom::Err::Incomplete(_) => MISSING_PARAMETER.clone(),
        nom::Err::Error(_) => SYNTAX_ERROR.clone(),
        nom::Err::Failure(_) => SYNTAX_ERROR.clone(),
    })
}

// Parse an authentication response from the client
pub(crate) fn parse_auth_response(line: &[u8]) -> Result<&[u8], Reply> {
    auth_response(line)
        .map(|r| r.1)
        .map_err(|_| SYNTAX_ERROR.clone())
}

// Split a command line into an upper case verb and its arguments.
// Works on raw bytes so that invalid UTF-8 never hides the verb.
pub(crate) fn split_verb(line: &[u8]) -> Option<(String, Vec<String>)> {
    let mut words = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| String::from_utf8_lossy(w).into_owned());
    let verb = words.next()?.to_ascii_uppercase();
    Some((verb, words.collect()))
}

fn command(buf: &[u8]) -> IResult<&[u8], Cmd> {
    terminated(
        alt((
            helo, ehlo, mail, rcpt, data, rset, quit, vrfy, noop, starttls, auth,
        )),
        tag("\r\n"),
    )(buf)
}

fn hello_domain(buf: &[u8]) -> IResult<&[u8], &str> {
    map_res(is_not(b" \t\r\n" as &[u8]), str::from_utf8)(buf)
}

fn helo(buf: &[u8]) -> IResult<&[u8], Cmd> {
    let parse_domain = preceded(cmd("helo"), hello_domain);
    map(parse_domain, |domain| Cmd::Helo { domain })(buf)
}

fn ehlo(buf: &[u8]) -> IResult<&[u8], Cmd> {
    let parse_domain = preceded(cmd("ehlo"), hello_domain);
    map(parse_domain, |domain| Cmd::Ehlo { domain })(buf)
}

fn mail_path(buf: &[u8]) -> IResult<&[u8], &str> {
    map_res(is_not(b" <>\t\r\n" as &[u8]), str::from_utf8)(buf)
}

// The null reverse path <> is allowed for bounces
fn reverse_path(buf: &[u8]) -> IResult<&[u8], &str> {
    alt((mail_path, map(tag(""), |_| "")))(buf)
}

fn take_all(buf: &[u8]) -> IResult<&[u8], &str> {
    map_res(is_not(b"\r\n" as &[u8]), str::from_utf8)(buf)
}

fn body_eq_8bit(buf: &[u8]) -> IResult<&[u8], bool> {
    let preamble = pair(space, tag_no_case("body="));
    let is8bit = alt((
        value(true, tag_no_case("8bitmime")),
        value(false, tag_no_case("7bit")),
    ));
    preceded(preamble, is8bit)(buf)
}

fn is8bitmime(buf: &[u8]) -> IResult<&[u8], bool> {
    body_eq_8bit(buf).or_else(|_| Ok((buf, false)))
}

fn mail(buf: &[u8]) -> IResult<&[u8], Cmd> {
    let from = separated_pair(tag_no_case("from:"), space0, tag("<"));
    let preamble = pair(cmd("mail"), from);
    let mail_path_parser = preceded(preamble, reverse_path);
    let parser = separated_pair(mail_path_parser, tag(">"), is8bitmime);
    map(parser, |r| Cmd::Mail {
        reverse_path: r.0,
        is8bit: r.1,
    })(buf)
}

fn rcpt(buf: &[u8]) -> IResult<&[u8], Cmd> {
    let to = separated_pair(tag_no_case("to:"), space0, tag("<"));
    let preamble = pair(cmd("rcpt"), to);
    let mail_path_parser = preceded(preamble, mail_path);
    let parser = terminated(mail_path_parser, tag(">"));
    map(parser, |path| Cmd::Rcpt { forward_path: path })(buf)
}

fn data(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::Data, tag_no_case("data"))(buf)
}

fn rset(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::Rset, tag_no_case("rset"))(buf)
}

fn quit(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::Quit, tag_no_case("quit"))(buf)
}

fn vrfy(buf: &[u8]) -> IResult<&[u8], Cmd> {
    let preamble = preceded(cmd("vrfy"), take_all);
    value(Cmd::Vrfy, preamble)(buf)
}

fn noop(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::Noop, tag_no_case("noop"))(buf)
}

fn starttls(buf: &[u8]) -> IResult<&[u8], Cmd> {
    value(Cmd::StartTls, tag_no_case("starttls"))(buf)
}

fn is_base64(chr: u8) -> bool {
    is_alphanumeric(chr) || (chr == b'+') || (chr == b'/' || chr == b'=')
}

fn is_mechanism(chr: u8) -> bool {
    is_alphanumeric(chr) || chr == b'-' || chr == b'_'
}

fn auth_initial(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(space, take_while1(is_base64))(buf)
}

fn auth_response(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_while1(is_base64), tag("\r\n"))(buf)
}

fn auth(buf: &[u8]) -> IResult<&[u8], Cmd> {
    let mechanism = map_res(take_while1(is_mechanism), str::from_utf8);
    let parser = preceded(cmd("auth"), pair(mechanism, opt(auth_initial)));
    map(parser, |(mechanism, initial)| Cmd::Auth { mechanism, initial })(buf)
}

//---- Helper functions ---------------------------------------------------------

// Return a parser to match the given command
fn cmd(cmd_tag: &'static str) -> impl Fn(&[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    move |buf: &[u8]| pair(tag_no_case(cmd_tag), space)(buf)
}

// Match one or more spaces
fn space(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(|b| b == b' ')(buf)
}

// A lone "=" is a zero-length initial response (RFC 4954)
const EMPTY_RESPONSE: &[u8] = b"=";

// Decode a base64 SASL PLAIN response into [authentication id, password].
// The authorization id is dropped. Anything undecodable yields no arguments.
pub(crate) fn decode_sasl_plain(param: &[u8]) -> Vec<String> {
    if param == EMPTY_RESPONSE {
        return Vec::new();
    }
    let bytes = match STANDARD.decode(param) {
        Ok(bytes) => bytes,
        Err(_) => return Vec::new(),
    };
    let fields: Vec<&[u8]> = bytes.split(|b| b == &0u8).collect();
    if fields.len() != 3 {
        return Vec::new();
    }
    fields[1..]
        .iter()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

//---- Tests --------------------------------------------------------------------
