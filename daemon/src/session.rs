// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Control-plane sessions: one per accepted TCP connection. Each session
//! accumulates bytes into a bounded line buffer and processes one
//! newline-terminated command at a time. The command lexicon is
//! `{prefix}set`, `{prefix}get`, `{prefix}cat`, `{prefix}list`,
//! `{prefix}loadso`, with the prefix substituted at build time
//! ([`crate::limits::CMD_PREFIX`]).

use std::io::{self, Write};
use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::str::FromStr;

use mio::net::TcpStream;
use mio::{Interest, Registry};
use smallvec::SmallVec;

use crate::ids::ConnId;
use crate::limits::{CMD_PREFIX, MX_CMD, MX_SESSION};
use crate::reactor::session_token;

// ─────────────────────────────── Parsing ────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Set,
    Get,
    Cat,
    List,
    Loadso,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    UnknownVerb(String),

    #[error("missing {0}")]
    Missing(&'static str),
}

/// One parsed command. `args` is the raw remainder of the line after the
/// resource token — `set` hands it to the driver untouched.
#[derive(Debug, PartialEq, Eq)]
pub struct Command<'a> {
    pub verb: Verb,
    pub selector: Option<&'a str>,
    pub resource: Option<&'a str>,
    pub args: &'a str,
}

fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(idx) => Some((&s[..idx], &s[idx..])),
        None => Some((s, "")),
    }
}

/// Parse one line (newline already stripped). Empty lines parse to `None`.
///
/// # Errors
///
/// [`ParseError`] text is sent verbatim to the issuing session.
pub fn parse_line(line: &str) -> Result<Option<Command<'_>>, ParseError> {
    let line = line.trim_end_matches('\r');
    let Some((word, rest)) = next_token(line) else {
        return Ok(None);
    };

    let verb = word
        .strip_prefix(CMD_PREFIX)
        .and_then(|bare| Verb::from_str(bare).ok())
        .ok_or_else(|| ParseError::UnknownVerb(word.to_string()))?;

    let (selector, rest) = match next_token(rest) {
        Some((token, rest)) => (Some(token), rest),
        None => (None, ""),
    };
    let (resource, rest) = match next_token(rest) {
        Some((token, rest)) => (Some(token), rest),
        None => (None, ""),
    };

    match verb {
        Verb::Set | Verb::Get | Verb::Cat => {
            if selector.is_none() {
                return Err(ParseError::Missing("slot or driver name"));
            }
            if resource.is_none() {
                return Err(ParseError::Missing("resource name"));
            }
        }
        Verb::Loadso => {
            if selector.is_none() {
                return Err(ParseError::Missing("driver name"));
            }
        }
        Verb::List => {}
    }

    Ok(Some(Command { verb, selector, resource, args: rest.trim() }))
}

// ──────────────────────────── Line buffering ────────────────────────────

/// Bounded accumulator for one session's input. Partial trailing input is
/// retained across reads; a line that outgrows [`MX_CMD`] is discarded and
/// reported once.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

/// Complete lines extracted from one read, plus whether an overlong line
/// was discarded along the way.
#[derive(Debug, PartialEq, Eq)]
pub struct Drained {
    pub lines: SmallVec<[String; 2]>,
    pub overflowed: bool,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(MX_CMD) }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Drained {
        let mut drained = Drained { lines: SmallVec::new(), overflowed: false };
        for &byte in bytes {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                drained.lines.push(line);
            } else if self.buf.len() >= MX_CMD {
                self.buf.clear();
                drained.overflowed = true;
            } else {
                self.buf.push(byte);
            }
        }
        drained
    }
}

// ───────────────────────────── Session pool ─────────────────────────────

#[derive(Debug)]
pub struct UiSession {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub lines: LineBuffer,
    /// Broadcast binding: this session receives every fan-out whose key
    /// matches. Cleared only by session destruction or a rebinding `cat`.
    pub bkey: Option<NonZeroU16>,
}

#[derive(Debug, thiserror::Error)]
#[error("session pool exhausted ({MX_SESSION} sessions)")]
pub struct SessionPoolExhausted;

#[derive(Debug)]
pub struct SessionTable {
    sessions: Vec<Option<UiSession>>,
}

impl Default for SessionTable {
    fn default() -> Self { Self::new() }
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: (0..MX_SESSION).map(|_| None).collect() }
    }

    /// Adopt an accepted connection: allocate a connection index, register
    /// for readability. A full pool rejects the connection (the caller
    /// drops the stream, closing it).
    ///
    /// # Errors
    ///
    /// [`SessionPoolExhausted`] when all `MX_SESSION` entries are live.
    pub fn adopt(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        registry: &Registry,
    ) -> Result<ConnId, SessionPoolExhausted> {
        let idx = self
            .sessions
            .iter()
            .position(Option::is_none)
            .ok_or(SessionPoolExhausted)?;
        let conn = ConnId(idx as u8);

        if let Err(e) = registry.register(&mut stream, session_token(conn), Interest::READABLE) {
            tracing::warn!(%peer, "cannot register session: {e}");
            return Err(SessionPoolExhausted);
        }

        self.sessions[idx] = Some(UiSession {
            stream,
            peer,
            lines: LineBuffer::new(),
            bkey: None,
        });
        Ok(conn)
    }

    /// Destroy a session. Its broadcast binding dies with it; the
    /// resource-side key is cleared lazily on the next empty fan-out.
    pub fn close(&mut self, conn: ConnId, registry: &Registry) {
        if let Some(entry) = self.sessions.get_mut(conn.0 as usize) {
            if let Some(mut session) = entry.take() {
                let _ = registry.deregister(&mut session.stream);
                tracing::debug!(conn = %conn, peer = %session.peer, "session closed");
            }
        }
    }

    #[must_use]
    pub fn get_mut(&mut self, conn: ConnId) -> Option<&mut UiSession> {
        self.sessions.get_mut(conn.0 as usize)?.as_mut()
    }

    #[must_use]
    pub fn is_active(&self, conn: ConnId) -> bool {
        self.sessions
            .get(conn.0 as usize)
            .is_some_and(Option::is_some)
    }

    /// Connection indices currently bound to `key`, in session-table order
    /// (clients must not rely on any particular order).
    #[must_use]
    pub fn subscribed(&self, key: NonZeroU16) -> SmallVec<[ConnId; 4]> {
        self.sessions
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                entry
                    .as_ref()
                    .filter(|session| session.bkey == Some(key))
                    .map(|_| ConnId(idx as u8))
            })
            .collect()
    }

    /// Write the whole payload or fail. `WouldBlock` counts as failure —
    /// there is no flow-control policy beyond subscription presence, and a
    /// client that stops draining gets torn down by the caller.
    ///
    /// # Errors
    ///
    /// Any short or failed write.
    pub fn write_bytes(&mut self, conn: ConnId, bytes: &[u8]) -> io::Result<()> {
        let session = self
            .get_mut(conn)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut written = 0;
        while written < bytes.len() {
            match session.stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests_parse {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn set_keeps_the_raw_value_tail() {
        let cmd = parse_line("pcset out4 outval f").unwrap().unwrap();
        assert_eq!(cmd.verb, Verb::Set);
        assert_eq!(cmd.selector, Some("out4"));
        assert_eq!(cmd.resource, Some("outval"));
        assert_eq!(cmd.args, "f");
    }

    #[test]
    fn set_value_may_contain_spaces() {
        let cmd = parse_line("pcset 2 text hello brave world").unwrap().unwrap();
        assert_eq!(cmd.selector, Some("2"));
        assert_eq!(cmd.args, "hello brave world");
    }

    #[test]
    fn get_and_cat_need_selector_and_resource() {
        assert_eq!(
            parse_line("pcget out4"),
            Err(ParseError::Missing("resource name"))
        );
        assert_eq!(
            parse_line("pccat"),
            Err(ParseError::Missing("slot or driver name"))
        );
    }

    #[test]
    fn list_selector_is_optional() {
        let cmd = parse_line("pclist").unwrap().unwrap();
        assert_eq!(cmd.verb, Verb::List);
        assert_eq!(cmd.selector, None);

        let cmd = parse_line("pclist bb4io").unwrap().unwrap();
        assert_eq!(cmd.selector, Some("bb4io"));
    }

    #[test_case("set out4 outval f" ; "missing prefix")]
    #[test_case("pcfrob out4" ; "unknown verb")]
    #[test_case("pc" ; "prefix alone")]
    fn unknown_verbs_are_rejected(line: &str) {
        assert!(matches!(parse_line(line), Err(ParseError::UnknownVerb(_))));
    }

    #[test]
    fn empty_and_blank_lines_are_no_ops() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   \r").unwrap(), None);
    }

    #[test]
    fn carriage_return_is_stripped() {
        let cmd = parse_line("pcget bb4io switches\r").unwrap().unwrap();
        assert_eq!(cmd.resource, Some("switches"));
        assert_eq!(cmd.args, "");
    }
}

#[cfg(test)]
mod tests_line_buffer {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_lines_and_retains_partials() {
        let mut lb = LineBuffer::new();
        let drained = lb.push_bytes(b"pcget a b\npcset c");
        assert_eq!(drained.lines.len(), 1);
        assert_eq!(drained.lines[0], "pcget a b");
        assert!(!drained.overflowed);

        let drained = lb.push_bytes(b" d e\n");
        assert_eq!(drained.lines[0], "pcset c d e");
    }

    #[test]
    fn overlong_line_is_discarded_and_flagged() {
        let mut lb = LineBuffer::new();
        let long = vec![b'x'; MX_CMD + 10];
        let drained = lb.push_bytes(&long);
        assert!(drained.overflowed);
        assert!(drained.lines.is_empty());

        // The next well-formed line still parses.
        let drained = lb.push_bytes(b"\npclist\n");
        assert_eq!(drained.lines.len(), 2);
        assert_eq!(drained.lines[1], "pclist");
    }
}
