//! Line Framing and Command Parser
//!
//! Clients send one command per line. The connection layer accumulates bytes
//! in a buffer and asks [`frame_line`] whether a complete line has arrived;
//! each complete line is then turned into a [`Command`] by [`parse_command`].
//!
//! ## How the Parser Works
//!
//! `frame_line` returns either:
//! - `Some(len)` - a full line of `len` bytes (terminator included) is buffered
//! - `None` - no terminator yet, the caller should read more data
//!
//! `parse_command` never looks past the first line it is given. Tokens after
//! the ones an opcode needs are ignored, and the opcode may be followed
//! directly by its first argument (`qname` is the same as `q name`).

use crate::protocol::types::{opcode, Command, NEWLINE};
use crate::storage::MAX_FIELD_LEN;
use thiserror::Error;

/// Errors that can occur while parsing a command line.
///
/// Every variant is answered in-band with `ill-formed command`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line is empty or holds only an opcode
    #[error("command too short")]
    TooShort,

    /// Unknown opcode character
    #[error("unknown opcode: {0:?}")]
    UnknownOpcode(char),

    /// A required argument is missing
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// An argument exceeds the maximum field length
    #[error("argument too long: {len} bytes (max: {max})")]
    ArgumentTooLong { len: usize, max: usize },

    /// The line is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Returns the length of the first complete line in `buf`, terminator
/// included, or `None` if no terminator has arrived yet.
#[inline]
pub fn frame_line(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == NEWLINE).map(|pos| pos + 1)
}

/// Parses one command line.
///
/// # Example
///
/// ```
/// use treekv::protocol::{parse_command, Command};
///
/// let command = parse_command(b"a name Ariz\n").unwrap();
/// assert_eq!(
///     command,
///     Command::Add { key: "name".into(), value: "Ariz".into() }
/// );
/// ```
pub fn parse_command(line: &[u8]) -> ParseResult<Command> {
    let line = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    let line = line.trim_end_matches(['\r', '\n']);

    let mut chars = line.chars();
    let opcode = chars.next().ok_or(ParseError::TooShort)?;
    let rest = chars.as_str();
    if rest.is_empty() {
        return Err(ParseError::TooShort);
    }

    let mut args = rest.split_whitespace();

    match opcode {
        opcode::QUERY => Ok(Command::Query {
            key: next_arg(&mut args, "key")?,
        }),
        opcode::ADD => Ok(Command::Add {
            key: next_arg(&mut args, "key")?,
            value: next_arg(&mut args, "value")?,
        }),
        opcode::DELETE => Ok(Command::Delete {
            key: next_arg(&mut args, "key")?,
        }),
        opcode::FILE => Ok(Command::File {
            path: next_arg(&mut args, "path")?,
        }),
        other => Err(ParseError::UnknownOpcode(other)),
    }
}

/// Takes the next argument token, enforcing the field length limit.
fn next_arg<'a>(
    args: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> ParseResult<String> {
    let arg = args.next().ok_or(ParseError::MissingArgument(name))?;
    if arg.len() > MAX_FIELD_LEN {
        return Err(ParseError::ArgumentTooLong {
            len: arg.len(),
            max: MAX_FIELD_LEN,
        });
    }
    Ok(arg.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(key: &str) -> Command {
        Command::Query {
            key: key.to_string(),
        }
    }

    #[test]
    fn test_frame_line() {
        assert_eq!(frame_line(b""), None);
        assert_eq!(frame_line(b"q name"), None);
        assert_eq!(frame_line(b"q name\n"), Some(7));
        assert_eq!(frame_line(b"q a\nq b\n"), Some(4));
        assert_eq!(frame_line(b"q a\r\n"), Some(5));
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(parse_command(b"q name\n").unwrap(), query("name"));
        assert_eq!(parse_command(b"q name\r\n").unwrap(), query("name"));
        assert_eq!(parse_command(b"q   name   ").unwrap(), query("name"));
        assert_eq!(parse_command(b"qname").unwrap(), query("name"));
    }

    #[test]
    fn test_parse_add() {
        assert_eq!(
            parse_command(b"a k v").unwrap(),
            Command::Add {
                key: "k".to_string(),
                value: "v".to_string()
            }
        );
        // Extra tokens are ignored
        assert_eq!(
            parse_command(b"a k v extra").unwrap(),
            Command::Add {
                key: "k".to_string(),
                value: "v".to_string()
            }
        );
    }

    #[test]
    fn test_parse_delete_and_file() {
        assert_eq!(
            parse_command(b"d k\n").unwrap(),
            Command::Delete {
                key: "k".to_string()
            }
        );
        assert_eq!(
            parse_command(b"f /tmp/commands.txt\n").unwrap(),
            Command::File {
                path: "/tmp/commands.txt".to_string()
            }
        );
    }

    #[test]
    fn test_parse_too_short() {
        assert_eq!(parse_command(b""), Err(ParseError::TooShort));
        assert_eq!(parse_command(b"\n"), Err(ParseError::TooShort));
        assert_eq!(parse_command(b"q"), Err(ParseError::TooShort));
        assert_eq!(parse_command(b"q\n"), Err(ParseError::TooShort));
    }

    #[test]
    fn test_parse_missing_arguments() {
        assert_eq!(
            parse_command(b"q   \n"),
            Err(ParseError::MissingArgument("key"))
        );
        assert_eq!(
            parse_command(b"a key\n"),
            Err(ParseError::MissingArgument("value"))
        );
        assert_eq!(
            parse_command(b"f \n"),
            Err(ParseError::MissingArgument("path"))
        );
    }

    #[test]
    fn test_parse_unknown_opcode() {
        assert_eq!(
            parse_command(b"x key\n"),
            Err(ParseError::UnknownOpcode('x'))
        );
        assert_eq!(
            parse_command(b"Q key\n"),
            Err(ParseError::UnknownOpcode('Q'))
        );
    }

    #[test]
    fn test_parse_argument_too_long() {
        let line = format!("a {} v", "k".repeat(MAX_FIELD_LEN + 1));
        assert_eq!(
            parse_command(line.as_bytes()),
            Err(ParseError::ArgumentTooLong {
                len: MAX_FIELD_LEN + 1,
                max: MAX_FIELD_LEN
            })
        );

        let line = format!("a k {}", "v".repeat(MAX_FIELD_LEN));
        assert!(parse_command(line.as_bytes()).is_ok());
    }

    #[test]
    fn test_parse_invalid_utf8() {
        assert!(matches!(
            parse_command(b"q \xff\xfe\n"),
            Err(ParseError::InvalidUtf8(_))
        ));
    }
}
