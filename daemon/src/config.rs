// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Command-line configuration for `fpgamuxd`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::limits::{DEF_PORT, MX_SLOT};

/// One `--overload SLOT:DRIVER` request: load a specific driver into a
/// specific slot at start-up, bypassing the enumerator for that slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overload {
    pub slot: u8,
    pub driver: String,
}

impl FromStr for Overload {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (slot, driver) = s
            .split_once(':')
            .ok_or_else(|| format!("expected SLOT:DRIVER, got '{s}'"))?;
        let slot: u8 = slot
            .parse()
            .map_err(|_| format!("bad slot number '{slot}'"))?;
        if usize::from(slot) >= MX_SLOT {
            return Err(format!("slot {slot} out of range (0-{})", MX_SLOT - 1));
        }
        if driver.is_empty() {
            return Err("empty driver name".to_string());
        }
        Ok(Self { slot, driver: driver.to_string() })
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "fpgamuxd",
    version,
    about = "Multiplex an ASCII control port onto an FPGA serial link"
)]
pub struct Config {
    /// Control-plane TCP port.
    #[arg(short = 'p', long, default_value_t = DEF_PORT)]
    pub port: u16,

    /// Listen on all interfaces instead of loopback only.
    #[arg(short = 'a', long)]
    pub any: bool,

    /// Serial device connected to the FPGA.
    #[arg(short = 's', long, default_value = "/dev/ttyUSB0")]
    pub serial: PathBuf,

    /// Load DRIVER into SLOT at start-up, overriding the enumerator.
    #[arg(short = 'o', long = "overload", value_name = "SLOT:DRIVER")]
    pub overloads: Vec<Overload>,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log errors only.
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Config {
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = if self.any {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        SocketAddr::new(ip, self.port)
    }
}

#[cfg(test)]
mod tests_config {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn defaults() {
        let cfg = Config::parse_from(["fpgamuxd"]);
        assert_eq!(cfg.port, DEF_PORT);
        assert!(!cfg.any);
        assert_eq!(cfg.bind_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn overloads_parse() {
        let cfg = Config::parse_from(["fpgamuxd", "-o", "2:out4", "-o", "0:bb4io"]);
        assert_eq!(
            cfg.overloads,
            vec![
                Overload { slot: 2, driver: "out4".into() },
                Overload { slot: 0, driver: "bb4io".into() },
            ]
        );
    }

    #[test_case("nodelimiter" ; "missing colon")]
    #[test_case("99:out4" ; "slot out of range")]
    #[test_case("x:out4" ; "non-numeric slot")]
    #[test_case("3:" ; "empty driver")]
    fn bad_overloads_are_rejected(arg: &str) {
        assert!(Overload::from_str(arg).is_err());
    }

    #[test]
    fn any_binds_unspecified() {
        let cfg = Config::parse_from(["fpgamuxd", "--any", "--port", "9000"]);
        assert_eq!(cfg.bind_addr().ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(cfg.bind_addr().port(), 9000);
    }
}
