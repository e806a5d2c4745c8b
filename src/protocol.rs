//! Key/value wire protocol.
//!
//! Every message is a single line of percent-encoded `key=value` pairs
//! joined by `&` and terminated by `\n`:
//!
//! ```text
//! Request:  cmd=hello&name=Ann\n
//! Response: resp=Hello,%20Ann\n
//! ```
//!
//! Requests always carry a `cmd` field; responses carry a single `resp`.
//! Key order on the wire is unspecified.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;
use thiserror::Error;

/// Characters escaped on the wire. Non-ASCII bytes are always escaped.
const FIELD: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'%')
    .add(b'&')
    .add(b'=')
    .add(b'+')
    .add(b'#');

/// Decoded key/value message.
pub type Fields = BTreeMap<String, String>;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A pair had no `=` separator.
    #[error("pair '{0}' has no '=' separator")]
    MissingSeparator(String),
    /// A key or value did not percent-decode to UTF-8.
    #[error("'{0}' is not valid percent-encoded UTF-8")]
    InvalidEncoding(String),
}

/// Encode fields into one newline-terminated wire line.
pub fn encode(fields: &Fields) -> Vec<u8> {
    let mut line = String::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            line.push('&');
        }
        line.extend(utf8_percent_encode(key, FIELD));
        line.push('=');
        line.extend(utf8_percent_encode(value, FIELD));
    }
    line.push('\n');
    line.into_bytes()
}

/// Decode one wire line (with or without its terminator) into fields.
///
/// Empty segments are skipped, so a trailing `&` is accepted. `+` is a
/// literal plus sign.
pub fn decode(line: &str) -> Result<Fields, CodecError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let mut fields = Fields::new();

    for pair in line.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CodecError::MissingSeparator(pair.to_string()))?;
        fields.insert(decode_component(key)?, decode_component(value)?);
    }

    Ok(fields)
}

fn decode_component(raw: &str) -> Result<String, CodecError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| CodecError::InvalidEncoding(raw.to_string()))
}

/// A required field was absent from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("missing field '{0}'")]
pub struct MissingField(pub &'static str);

/// Recognized request commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Hello { name: &'a str },
    Math { eq: &'a str },
    Exit { name: &'a str },
    /// Absent or unrecognized `cmd`.
    Unknown,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    fields: Fields,
}

impl Request {
    /// Decode a request from one wire line.
    pub fn parse(line: &str) -> Result<Self, CodecError> {
        decode(line).map(|fields| Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn require(&self, key: &'static str) -> Result<&str, MissingField> {
        self.get(key).ok_or(MissingField(key))
    }

    /// The `cmd` value, if present.
    pub fn cmd(&self) -> Option<&str> {
        self.get("cmd")
    }

    /// Interpret the request, checking the fields each command needs.
    pub fn command(&self) -> Result<Command<'_>, MissingField> {
        match self.cmd() {
            Some("hello") => Ok(Command::Hello {
                name: self.require("name")?,
            }),
            Some("math") => Ok(Command::Math {
                eq: self.require("eq")?,
            }),
            Some("exit") => Ok(Command::Exit {
                name: self.require("name")?,
            }),
            _ => Ok(Command::Unknown),
        }
    }
}

/// A server response carrying a single `resp` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    text: String,
}

impl Response {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn unknown_command() -> Self {
        Self::new("Unknown command")
    }

    pub fn invalid_format() -> Self {
        Self::new("Invalid command format")
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Wire form of this response, newline-terminated.
    pub fn encode(&self) -> Vec<u8> {
        let mut fields = Fields::new();
        fields.insert("resp".to_string(), self.text.clone());
        encode(&fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_decode_request() {
        let decoded = decode("cmd=hello&name=Ann\n").unwrap();
        assert_eq!(decoded, fields(&[("cmd", "hello"), ("name", "Ann")]));
    }

    #[test]
    fn test_decode_keeps_plus() {
        let decoded = decode("cmd=math&eq=1+1").unwrap();
        assert_eq!(decoded.get("eq").map(String::as_str), Some("1+1"));
    }

    #[test]
    fn test_decode_trailing_ampersand_and_crlf() {
        let decoded = decode("resp=Hello%2C%20Ann&\r\n").unwrap();
        assert_eq!(decoded, fields(&[("resp", "Hello, Ann")]));
    }

    #[test]
    fn test_decode_empty_value() {
        let decoded = decode("cmd=math&eq=").unwrap();
        assert_eq!(decoded.get("eq").map(String::as_str), Some(""));
    }

    #[test]
    fn test_decode_missing_separator() {
        assert_eq!(
            decode("cmd=math&garbage"),
            Err(CodecError::MissingSeparator("garbage".to_string()))
        );
    }

    #[test]
    fn test_decode_invalid_encoding() {
        assert!(matches!(
            decode("name=%FF"),
            Err(CodecError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_encode_escapes_delimiters() {
        let encoded = encode(&fields(&[("resp", "a=b&c\nd 5+5 100%")]));
        assert_eq!(encoded, b"resp=a%3Db%26c%0Ad%205%2B5%20100%25\n".to_vec());
    }

    #[test]
    fn test_round_trip() {
        let original = fields(&[
            ("cmd", "math"),
            ("eq", "2^10"),
            ("name", "Zoë & Ann = friends + 100%"),
            ("empty", ""),
        ]);
        let encoded = encode(&original);
        let line = std::str::from_utf8(&encoded).unwrap();
        assert_eq!(decode(line).unwrap(), original);
    }

    #[test]
    fn test_command_hello() {
        let request = Request::parse("cmd=hello&name=Bo").unwrap();
        assert_eq!(request.command(), Ok(Command::Hello { name: "Bo" }));
    }

    #[test]
    fn test_command_missing_field() {
        let request = Request::parse("cmd=math").unwrap();
        assert_eq!(request.command(), Err(MissingField("eq")));

        let request = Request::parse("cmd=exit").unwrap();
        assert_eq!(request.command(), Err(MissingField("name")));
    }

    #[test]
    fn test_command_unknown() {
        let request = Request::parse("cmd=dance").unwrap();
        assert_eq!(request.command(), Ok(Command::Unknown));

        let request = Request::parse("name=Ann").unwrap();
        assert_eq!(request.command(), Ok(Command::Unknown));
    }

    #[test]
    fn test_response_encode() {
        let encoded = Response::new("Bye, Ann").encode();
        assert_eq!(encoded, b"resp=Bye,%20Ann\n".to_vec());
    }
}
