// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The daemon value: every table, the reactor, the link, and the dispatch
//! glue between them. All state lives here and is threaded explicitly into
//! driver callbacks through [`DriverHost`]; there is no process-global
//! mutable state.

use std::fmt::Write as _;
use std::io::{self, Read};
use std::net::SocketAddr;

use mio::Interest;
use mio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core_table::CoreTable;
use crate::drivers::{DriverError, DriverHost, DriverSpec, PendingLoad, Reply, SlotDriver, registry};
use crate::fabric;
use crate::ids::{ConnId, CoreId, RscId, SlotId};
use crate::limits::PROMPT;
use crate::link::{LinkError, SerialLink};
use crate::reactor::{Reactor, Turn, session_of_token, TOK_LISTENER, TOK_SERIAL};
use crate::router;
use crate::session::{Command, SessionTable, Verb, parse_line};
use crate::slot::{RscFlags, SlotTable, SlotTableError};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DaemonError {
    #[error("cannot bind control port {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// Fatal link loss: without the FPGA there is nothing to multiplex.
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("event loop failure: {0}")]
    Io(#[from] io::Error),
}

pub struct Daemon {
    cfg: Config,
    reactor: Reactor,
    link: SerialLink,
    listener: TcpListener,
    sessions: SessionTable,
    slots: SlotTable,
    cores: CoreTable,
    pending_loads: Vec<PendingLoad>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("link", &self.link.name())
            .field("slots", &self.slots.occupied().count())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Open the serial device and the control port, then boot slot 0.
    ///
    /// # Errors
    ///
    /// Start-up failures (device missing, port taken) are fatal.
    pub fn new(cfg: Config) -> Result<Self, DaemonError> {
        let link = SerialLink::open(&cfg.serial)?;
        let addr = cfg.bind_addr();
        let listener = std::net::TcpListener::bind(addr)
            .map_err(|source| DaemonError::Bind { addr, source })?;
        Self::with_parts(cfg, link, listener)
    }

    /// Assemble a daemon from pre-opened parts. Tests use this to drive
    /// the daemon over a socketpair "serial port" and an ephemeral TCP
    /// port.
    ///
    /// # Errors
    ///
    /// Registration failures are fatal.
    pub fn with_parts(
        cfg: Config,
        link: SerialLink,
        listener: std::net::TcpListener,
    ) -> Result<Self, DaemonError> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let reactor = Reactor::new()?;
        link.register(reactor.registry())?;
        reactor
            .registry()
            .register(&mut listener, TOK_LISTENER, Interest::READABLE)?;

        let mut daemon = Self {
            cfg,
            reactor,
            link,
            listener,
            sessions: SessionTable::new(),
            slots: SlotTable::new(),
            cores: CoreTable::new(),
            pending_loads: Vec::new(),
        };
        daemon.boot();
        Ok(daemon)
    }

    /// Where the control port actually bound (tests pass port 0).
    ///
    /// # Errors
    ///
    /// Surfaces the OS lookup failure.
    pub fn local_addr(&self) -> io::Result<SocketAddr> { self.listener.local_addr() }

    /// Queue the start-up driver loads: explicit overloads first, and the
    /// enumerator into slot 0 unless an overload claimed it.
    fn boot(&mut self) {
        let mut slot0_claimed = false;
        for overload in &self.cfg.overloads {
            match registry::by_name(&overload.driver) {
                Some(spec) => {
                    slot0_claimed |= overload.slot == 0;
                    self.pending_loads.push(PendingLoad {
                        slot: Some(SlotId(overload.slot)),
                        spec,
                        core: None,
                    });
                }
                None => warn!("unknown driver '{}' in --overload", overload.driver),
            }
        }
        if !slot0_claimed {
            self.pending_loads.insert(0, PendingLoad {
                slot: Some(SlotId(0)),
                spec: registry::enumerator_spec(),
                core: Some(CoreId(0)),
            });
        }
        self.drain_pending_loads();
    }

    /// Run forever. Returns only on a fatal error.
    ///
    /// # Errors
    ///
    /// Fatal link loss or an event-loop failure.
    pub fn run(&mut self) -> Result<(), DaemonError> {
        info!(
            port = self.cfg.port,
            link = self.link.name(),
            "fpgamuxd up"
        );
        loop {
            self.turn()?;
        }
    }

    /// One reactor iteration: expired timers, then ready handles, then any
    /// driver loads queued during dispatch.
    ///
    /// # Errors
    ///
    /// See [`Daemon::run`].
    pub fn turn(&mut self) -> Result<(), DaemonError> {
        let Turn { fired, ready } = self.reactor.turn()?;

        for (_id, owner) in fired {
            self.with_driver(owner.slot, |driver, host| driver.on_timer(host, owner.token));
        }

        for event in ready {
            match event.token {
                TOK_SERIAL => self.on_serial()?,
                TOK_LISTENER => self.on_listener(),
                token => {
                    if let Some(conn) = session_of_token(token) {
                        self.on_session(conn);
                    } else if let Some(owner) = self.reactor.driver_fd_owner(token) {
                        self.with_driver(owner.slot, |driver, host| {
                            driver.on_fd(host, owner.token, event.readable);
                        });
                    }
                }
            }
        }

        self.drain_pending_loads();
        Ok(())
    }

    // ── Serial side ───────────────────────────────────────────────────

    fn on_serial(&mut self) -> Result<(), DaemonError> {
        let frames = self.link.pump_rx()?;
        for frame in frames {
            if let Some((slot, pkt)) =
                router::decode_and_route(&frame, self.link.name(), &self.cores)
            {
                self.with_driver(slot, |driver, host| driver.on_packet(host, &pkt));
            }
        }
        Ok(())
    }

    // ── Control-plane side ────────────────────────────────────────────

    fn on_listener(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    match self.sessions.adopt(stream, peer, self.reactor.registry()) {
                        Ok(conn) => debug!(%peer, conn = %conn, "session accepted"),
                        Err(e) => warn!(%peer, "rejecting connection: {e}"),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn on_session(&mut self, conn: ConnId) {
        let mut lines = Vec::new();
        let mut overflowed = false;
        let mut close = false;

        {
            let Some(session) = self.sessions.get_mut(conn) else { return };
            let mut buf = [0u8; 256];
            loop {
                match session.stream.read(&mut buf) {
                    Ok(0) => {
                        close = true;
                        break;
                    }
                    Ok(n) => {
                        let drained = session.lines.push_bytes(&buf[..n]);
                        overflowed |= drained.overflowed;
                        lines.extend(drained.lines);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        debug!(conn = %conn, "session read failed: {e}");
                        close = true;
                        break;
                    }
                }
            }
        }

        if overflowed {
            self.send_line(conn, "command too long");
            self.send_prompt(conn);
        }
        for line in &lines {
            if !self.sessions.is_active(conn) {
                break;
            }
            self.exec_line(conn, line);
        }
        if close {
            self.sessions.close(conn, self.reactor.registry());
        }
    }

    fn exec_line(&mut self, conn: ConnId, line: &str) {
        match parse_line(line) {
            Ok(None) => self.send_prompt(conn),
            Ok(Some(cmd)) => self.exec_command(conn, &cmd),
            Err(e) => {
                self.send_line(conn, &e.to_string());
                self.send_prompt(conn);
            }
        }
    }

    fn exec_command(&mut self, conn: ConnId, cmd: &Command<'_>) {
        match cmd.verb {
            Verb::List => self.cmd_list(conn, cmd.selector),
            Verb::Loadso => {
                // The parser guarantees the argument.
                let name = cmd.selector.unwrap_or_default();
                self.cmd_loadso(conn, name);
            }
            Verb::Set | Verb::Get | Verb::Cat => {
                let selector = cmd.selector.unwrap_or_default();
                let rsc_name = cmd.resource.unwrap_or_default();
                match self.lookup_resource(selector, rsc_name) {
                    Err(msg) => {
                        self.send_line(conn, &msg);
                        self.send_prompt(conn);
                    }
                    Ok((slot, rsc, flags)) => {
                        self.exec_resource_verb(conn, cmd, slot, rsc, flags, rsc_name);
                    }
                }
            }
        }
    }

    fn lookup_resource(
        &self,
        selector: &str,
        rsc_name: &str,
    ) -> Result<(SlotId, RscId, RscFlags), String> {
        let Some(slot) = self.slots.find_by_selector(selector) else {
            return Err(format!("unknown slot or driver: {selector}"));
        };
        let Some(entry) = self.slots.get(slot) else {
            return Err(format!("unknown slot or driver: {selector}"));
        };
        let Some(rsc) = entry.find_resource(rsc_name) else {
            return Err(format!("unknown resource: {rsc_name}"));
        };
        let flags = entry.resource(rsc).map(|r| r.flags).unwrap_or_default();
        Ok((slot, rsc, flags))
    }

    fn exec_resource_verb(
        &mut self,
        conn: ConnId,
        cmd: &Command<'_>,
        slot: SlotId,
        rsc: RscId,
        flags: RscFlags,
        rsc_name: &str,
    ) {
        match cmd.verb {
            Verb::Set => {
                if !flags.write {
                    self.send_line(conn, &format!("{rsc_name} is not writable"));
                    self.send_prompt(conn);
                    return;
                }
                let mut reply = Reply::new();
                let args = cmd.args;
                self.with_driver(slot, |driver, host| {
                    driver.on_set(host, rsc, args, conn, &mut reply);
                });
                self.finish_reply(conn, reply);
            }
            Verb::Get => {
                if !flags.read {
                    self.send_line(conn, &format!("{rsc_name} is not readable"));
                    self.send_prompt(conn);
                    return;
                }
                let mut reply = Reply::new();
                self.with_driver(slot, |driver, host| {
                    driver.on_get(host, rsc, conn, &mut reply);
                });
                self.finish_reply(conn, reply);
            }
            Verb::Cat => {
                if !flags.broadcast {
                    self.send_line(conn, &format!("{rsc_name} is not broadcastable"));
                    self.send_prompt(conn);
                    return;
                }
                self.cmd_cat(conn, slot, rsc);
            }
            Verb::List | Verb::Loadso => {}
        }
    }

    /// Ship a driver reply. A deferred reply suppresses both text and
    /// prompt; the driver finishes the interaction from its packet
    /// callback via the UI lock.
    fn finish_reply(&mut self, conn: ConnId, mut reply: Reply) {
        if reply.is_deferred() {
            return;
        }
        let text = reply.take_text();
        if !text.is_empty() {
            self.send_bytes(conn, text.as_bytes());
        }
        self.send_prompt(conn);
    }

    fn cmd_list(&mut self, conn: ConnId, selector: Option<&str>) {
        let mut text = String::new();
        match selector {
            None => {
                for (slot_id, slot) in self.slots.occupied() {
                    let _ = writeln!(text, "{slot_id}: {} - {}", slot.name, slot.desc);
                }
            }
            Some(sel) => match self.slots.find_by_selector(sel) {
                Some(slot_id) => {
                    if let Some(slot) = self.slots.get(slot_id) {
                        text.push_str(slot.help);
                    }
                }
                None => {
                    let _ = writeln!(text, "unknown slot or driver: {sel}");
                }
            },
        }
        self.send_bytes(conn, text.as_bytes());
        self.send_prompt(conn);
    }

    fn cmd_loadso(&mut self, conn: ConnId, name: &str) {
        match registry::by_name(name) {
            None => self.send_line(conn, &format!("unknown driver: {name}")),
            Some(spec) => match self.slots.next_free() {
                None => self.send_line(conn, &SlotTableError::NoFreeSlot.to_string()),
                Some(slot) => {
                    if let Err(e) = self.load_driver(slot, spec, None) {
                        self.send_line(conn, &e.to_string());
                    }
                }
            },
        }
        self.send_prompt(conn);
    }

    /// Subscribe this session to a resource's broadcast stream. The
    /// session is dedicated from here on: no prompt, payloads flow until
    /// the connection closes.
    fn cmd_cat(&mut self, conn: ConnId, slot: SlotId, rsc: RscId) {
        let key = fabric::encode_bkey(slot, rsc);
        if let Some(session) = self.sessions.get_mut(conn) {
            session.bkey = Some(key);
        }
        if let Some(resource) = self.slots.get_mut(slot).and_then(|s| s.resource_mut(rsc)) {
            if resource.bkey.is_none() {
                resource.bkey = Some(key);
            }
        }
    }

    // ── Driver plumbing ───────────────────────────────────────────────

    /// Lift the driver out of its slot, run `f` against it with a live
    /// [`DriverHost`], and put it back. Returns `None` when the slot hosts
    /// no driver.
    fn with_driver<R>(
        &mut self,
        slot: SlotId,
        f: impl FnOnce(&mut dyn SlotDriver, &mut DriverHost<'_>) -> R,
    ) -> Option<R> {
        let mut driver = self.slots.get_mut(slot)?.driver.take()?;
        let mut host = DriverHost {
            slot_id: slot,
            reactor: &mut self.reactor,
            link: &mut self.link,
            sessions: &mut self.sessions,
            slots: &mut self.slots,
            cores: &mut self.cores,
            pending_loads: &mut self.pending_loads,
        };
        let result = f(driver.as_mut(), &mut host);
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.driver = Some(driver);
        }
        Some(result)
    }

    fn load_driver(
        &mut self,
        slot: SlotId,
        spec: &'static DriverSpec,
        core: Option<CoreId>,
    ) -> Result<(), DriverError> {
        {
            let Some(entry) = self.slots.get_mut(slot) else {
                return Err(DriverError::Init(format!("slot {slot} out of range")));
            };
            if entry.in_use() {
                return Err(SlotTableError::SlotBusy(slot).into());
            }
            entry.core = core;
        }
        if let Some(core) = core {
            self.cores.bind(core, slot);
        }

        let mut driver = (spec.build)();
        let mut host = DriverHost {
            slot_id: slot,
            reactor: &mut self.reactor,
            link: &mut self.link,
            sessions: &mut self.sessions,
            slots: &mut self.slots,
            cores: &mut self.cores,
            pending_loads: &mut self.pending_loads,
        };
        match driver.initialize(slot, &mut host) {
            Ok(info) => {
                let populated = match self.slots.get_mut(slot) {
                    Some(entry) => entry.populate(&info),
                    None => Ok(()),
                };
                if let Err(e) = populated {
                    self.free_slot(slot);
                    warn!(driver = spec.name, "driver init rejected: {e}");
                    return Err(e.into());
                }
                if let Some(entry) = self.slots.get_mut(slot) {
                    entry.driver = Some(driver);
                }
                info!(slot = %slot, driver = spec.name, "driver loaded");
                Ok(())
            }
            Err(e) => {
                self.free_slot(slot);
                warn!(driver = spec.name, "driver init failed: {e}");
                Err(e)
            }
        }
    }

    /// Return a slot to the pool and drop everything it registered.
    fn free_slot(&mut self, slot: SlotId) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.clear();
        }
        self.cores.unbind_slot(slot);
        self.reactor.timers.del_owned_by(slot);
        self.reactor.del_fds_owned_by(slot);
    }

    fn drain_pending_loads(&mut self) {
        while !self.pending_loads.is_empty() {
            let load = self.pending_loads.remove(0);
            let slot = match load.slot.or_else(|| self.slots.next_free()) {
                Some(slot) => slot,
                None => {
                    warn!(driver = load.spec.name, "no free slot; driver not loaded");
                    continue;
                }
            };
            if let Err(e) = self.load_driver(slot, load.spec, load.core) {
                warn!(driver = load.spec.name, "deferred load failed: {e}");
            }
        }
    }

    // ── Session output helpers ────────────────────────────────────────

    fn send_bytes(&mut self, conn: ConnId, bytes: &[u8]) {
        if !self.sessions.is_active(conn) {
            return;
        }
        if self.sessions.write_bytes(conn, bytes).is_err() {
            self.sessions.close(conn, self.reactor.registry());
        }
    }

    fn send_line(&mut self, conn: ConnId, text: &str) {
        self.send_bytes(conn, format!("{text}\n").as_bytes());
    }

    fn send_prompt(&mut self, conn: ConnId) { self.send_bytes(conn, &[PROMPT]); }
}
