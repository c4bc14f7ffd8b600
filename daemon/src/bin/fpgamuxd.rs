// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! `fpgamuxd` entry point. SIGPIPE is left ignored (the Rust runtime's
//! default), so a client hanging up surfaces as `EPIPE` on the write and
//! tears down just that session.

use clap::Parser;
use miette::IntoDiagnostic;

use fpgamux_daemon::config::Config;
use fpgamux_daemon::daemon::Daemon;
use fpgamux_daemon::logging;

fn main() -> miette::Result<()> {
    let cfg = Config::parse();
    logging::init(&cfg)?;

    let mut daemon = Daemon::new(cfg).into_diagnostic()?;
    daemon.run().into_diagnostic()
}
