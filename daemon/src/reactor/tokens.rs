// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! `mio::Token` layout. The token is the only payload a readiness event
//! carries, so the whole dispatch fans out from these ranges.

use mio::Token;

use crate::ids::ConnId;
use crate::limits::MX_SESSION;

/// The serial link to the FPGA.
pub const TOK_SERIAL: Token = Token(0);

/// The control-plane TCP listener.
pub const TOK_LISTENER: Token = Token(1);

/// UI sessions occupy `[TOK_SESSION_BASE, TOK_SESSION_BASE + MX_SESSION)`.
pub const TOK_SESSION_BASE: usize = 0x10;

/// Driver-registered file handles occupy `[TOK_DRIVER_FD_BASE, …)`.
pub const TOK_DRIVER_FD_BASE: usize = 0x100;

#[must_use]
pub fn session_token(conn: ConnId) -> Token { Token(TOK_SESSION_BASE + conn.0 as usize) }

#[must_use]
pub fn session_of_token(token: Token) -> Option<ConnId> {
    let idx = token.0.checked_sub(TOK_SESSION_BASE)?;
    (idx < MX_SESSION).then(|| ConnId(idx as u8))
}

#[cfg(test)]
mod tests_tokens {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn session_tokens_round_trip() {
        for conn in 0..MX_SESSION as u8 {
            let token = session_token(ConnId(conn));
            assert_eq!(session_of_token(token), Some(ConnId(conn)));
        }
        assert_eq!(session_of_token(TOK_SERIAL), None);
        assert_eq!(session_of_token(Token(TOK_SESSION_BASE + MX_SESSION)), None);
    }
}
