// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Tracing setup: a single fmt layer writing to stderr, level driven by
//! `-v` / `-q`. The daemon has no file appender — a supervisor owns log
//! routing.

use tracing::Level;

use crate::config::Config;

#[must_use]
pub fn level_for(cfg: &Config) -> Level {
    if cfg.quiet {
        Level::ERROR
    } else {
        match cfg.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when a subscriber is already installed (only tests do that).
pub fn init(cfg: &Config) -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(level_for(cfg))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| miette::miette!("cannot install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests_logging {
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(&Config::parse_from(["d"])), Level::INFO);
        assert_eq!(level_for(&Config::parse_from(["d", "-v"])), Level::DEBUG);
        assert_eq!(level_for(&Config::parse_from(["d", "-vv"])), Level::TRACE);
        assert_eq!(level_for(&Config::parse_from(["d", "-q"])), Level::ERROR);
    }
}
