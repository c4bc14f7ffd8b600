// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios: a real daemon on an ephemeral TCP port, with the
//! FPGA played by this process over a socketpair standing in for the
//! serial link.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use clap::Parser;
use fpgamux_daemon::config::Config;
use fpgamux_daemon::daemon::Daemon;
use fpgamux_daemon::link::SerialLink;
use fpgamux_wire::{
    DeframeEvent, Deframer, OpCode, Packet, PktData, crc_xmodem, stuff_frame,
};

const PROMPT: u8 = b'\\';
const IO_TIMEOUT: Duration = Duration::from_secs(2);

// ───────────────────────────── FPGA simulator ────────────────────────────

/// One decoded host→FPGA request, sanity nibbles verified and stripped.
#[derive(Debug)]
struct Request {
    op: OpCode,
    core: u8,
    reg: u8,
    count: u8,
    data: Vec<u8>,
}

struct Fpga {
    port: UnixStream,
    deframer: Deframer,
}

impl Fpga {
    fn new(port: UnixStream) -> Self {
        port.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        Self { port, deframer: Deframer::new() }
    }

    /// Block until one complete request frame arrives.
    fn read_request(&mut self) -> Request {
        let mut byte = [0u8; 1];
        loop {
            self.port.read_exact(&mut byte).expect("request frame");
            match self.deframer.push(byte[0]) {
                Some(DeframeEvent::Frame(frame)) => return Self::decode_request(&frame),
                Some(DeframeEvent::Violation(v)) => panic!("sim saw violation: {v}"),
                None => {}
            }
        }
    }

    fn decode_request(frame: &[u8]) -> Request {
        assert!(crc_xmodem::verify(frame).is_ok(), "request crc");
        let cmd = frame[0];
        let core = frame[1];
        assert_eq!(cmd & 0xF0, 0xF0, "cmd sanity nibble");
        assert_eq!(core & 0xE0, 0xE0, "core sanity nibble");
        Request {
            op: OpCode::from_repr((cmd & 0x0C) >> 2).unwrap(),
            core: core & 0x0F,
            reg: frame[2],
            count: frame[3],
            data: frame[4..frame.len() - 2].to_vec(),
        }
    }

    fn send(&mut self, pkt: &Packet) {
        let frame = stuff_frame(&pkt.to_response_bytes());
        self.port.write_all(&frame).unwrap();
    }

    fn send_read_response(&mut self, core: u8, reg: u8, data: &[u8]) {
        let mut pkt = Packet::read(core, reg, data.len() as u8);
        pkt.data = PktData::from_slice(data);
        self.send(&pkt);
    }

    fn send_write_ack(&mut self, core: u8, reg: u8) {
        let mut pkt = Packet::write(core, reg, &[]);
        pkt.count = 0;
        self.send(&pkt);
    }

    fn send_autosend(&mut self, core: u8, reg: u8, data: &[u8]) {
        let mut pkt = Packet::read(core, reg, data.len() as u8);
        pkt.autosend = true;
        pkt.data = PktData::from_slice(data);
        self.send(&pkt);
    }

    /// Answer the enumerator's driver-ID probe: bb4io on core 1, out4 on
    /// core 2.
    fn answer_enumeration(&mut self) {
        let probe = self.read_request();
        assert_eq!(probe.op, OpCode::Read);
        assert_eq!(probe.core, 0);
        assert_eq!(probe.reg, 0);
        assert_eq!(probe.count, 32);

        let mut rom = [0u8; 32];
        rom[2..4].copy_from_slice(&0x0001u16.to_be_bytes()); // core 1: bb4io
        rom[4..6].copy_from_slice(&0x0002u16.to_be_bytes()); // core 2: out4
        self.send_read_response(0, 0, &rom);
    }
}

// ─────────────────────────────── TCP client ──────────────────────────────

struct Client(TcpStream);

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        stream.set_nodelay(true).unwrap();
        Self(stream)
    }

    fn send(&mut self, line: &str) { self.0.write_all(line.as_bytes()).unwrap(); }

    /// Read until the prompt byte; return everything before it.
    fn read_until_prompt(&mut self) -> String {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.0.read_exact(&mut byte).expect("prompt");
            if byte[0] == PROMPT {
                return String::from_utf8_lossy(&out).into_owned();
            }
            out.push(byte[0]);
        }
    }

    /// Read exactly `len` bytes (broadcast payloads carry no prompt).
    fn read_exactly(&mut self, len: usize) -> String {
        let mut buf = vec![0u8; len];
        self.0.read_exact(&mut buf).expect("payload");
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// True when nothing arrives within `wait`.
    fn expect_silence(&mut self, wait: Duration) -> bool {
        self.0.set_read_timeout(Some(wait)).unwrap();
        let mut byte = [0u8; 1];
        let silent = match self.0.read(&mut byte) {
            Ok(0) => false,
            Ok(_) => false,
            Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        };
        self.0.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        silent
    }

    fn read_listing(&mut self) -> String {
        self.send("pclist\n");
        self.read_until_prompt()
    }

    /// Poll `pclist` until the enumerated drivers show up.
    fn wait_ready(&mut self) {
        for _ in 0..100 {
            self.send("pclist\n");
            let listing = self.read_until_prompt();
            if listing.contains("out4") && listing.contains("bb4io") {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("daemon never finished enumeration");
    }
}

// ──────────────────────────────── Harness ────────────────────────────────

struct Harness {
    addr: SocketAddr,
    fpga: Fpga,
}

fn start_daemon() -> Harness {
    let (near, far) = UnixStream::pair().unwrap();
    let link = SerialLink::from_fd(near.into(), "sim-serial").unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let cfg = Config::parse_from(["fpgamuxd"]);

    // The enumeration probe is sent during construction.
    let mut daemon = Daemon::with_parts(cfg, link, listener).unwrap();
    let addr = daemon.local_addr().unwrap();
    thread::spawn(move || {
        let _ = daemon.run();
    });

    let mut fpga = Fpga::new(far);
    fpga.answer_enumeration();
    Harness { addr, fpga }
}

// ─────────────────────────────── Scenarios ───────────────────────────────

#[test]
fn round_trip_set_with_ack() {
    let mut h = start_daemon();
    let mut client = Client::connect(h.addr);
    client.wait_ready();

    client.send("pcset out4 outval f\n");

    let req = h.fpga.read_request();
    assert_eq!(req.op, OpCode::Write);
    assert_eq!(req.core, 2);
    assert_eq!(req.reg, 0);
    assert_eq!(req.count, 1);
    assert_eq!(req.data, vec![0x0F]);
    h.fpga.send_write_ack(2, 0);

    // Empty response, then the prompt.
    assert_eq!(client.read_until_prompt(), "");

    // The ack cancelled the watchdog: no ERROR 101 follows.
    assert!(client.expect_silence(Duration::from_millis(300)));

    // The driver's model answers the read-back synchronously.
    client.send("pcget out4 outval\n");
    assert_eq!(client.read_until_prompt(), "f\n");
}

#[test]
fn broadcast_fans_out_to_every_subscriber() {
    let mut h = start_daemon();
    let mut ctl = Client::connect(h.addr);
    ctl.wait_ready();

    let mut client_a = Client::connect(h.addr);
    let mut client_b = Client::connect(h.addr);
    client_a.send("pccat bb4io buttons\n");
    client_b.send("pccat bb4io buttons\n");
    thread::sleep(Duration::from_millis(150));

    h.fpga.send_autosend(1, 0, &[0x03]);
    assert_eq!(client_a.read_exactly(3), "03\n");
    assert_eq!(client_b.read_exactly(3), "03\n");

    // Dropping one subscriber leaves the other unaffected.
    drop(client_a);
    thread::sleep(Duration::from_millis(150));
    h.fpga.send_autosend(1, 0, &[0x05]);
    assert_eq!(client_b.read_exactly(3), "05\n");

    // cat sessions never see a prompt.
    assert!(client_b.expect_silence(Duration::from_millis(200)));
}

#[test]
fn async_get_routes_to_the_locked_session() {
    let mut h = start_daemon();
    let mut client = Client::connect(h.addr);
    client.wait_ready();

    client.send("pcget bb4io switches\n");

    let req = h.fpga.read_request();
    assert_eq!(req.op, OpCode::Read);
    assert_eq!(req.core, 1);
    assert_eq!(req.reg, 1);
    assert_eq!(req.count, 3);

    // Nothing reaches the client until the hardware answers.
    assert!(client.expect_silence(Duration::from_millis(150)));

    h.fpga.send_read_response(1, 1, &[0xAA, 0xBB, 0xCC]);
    assert_eq!(client.read_until_prompt(), "aa bbcc\n");
}

#[test]
fn missing_ack_fires_the_watchdog_once() {
    let mut h = start_daemon();
    let mut client = Client::connect(h.addr);
    client.wait_ready();

    client.send("pcset out4 outval 3\n");
    let req = h.fpga.read_request();
    assert_eq!(req.data, vec![0x03]);
    // No ack: the set completes with a bare prompt...
    assert_eq!(client.read_until_prompt(), "");

    // ...and the 100 ms watchdog surfaces the numbered error, exactly once.
    let mut line = [0u8; 64];
    let n = client.0.read(&mut line).unwrap();
    let text = String::from_utf8_lossy(&line[..n]).into_owned();
    assert!(text.starts_with("ERROR 101"), "got: {text}");
    assert!(client.expect_silence(Duration::from_millis(300)));

    // A subsequent acked write proceeds normally.
    client.send("pcset out4 outval 7\n");
    let req = h.fpga.read_request();
    assert_eq!(req.data, vec![0x07]);
    h.fpga.send_write_ack(2, 0);
    assert_eq!(client.read_until_prompt(), "");
    assert!(client.expect_silence(Duration::from_millis(300)));
}

#[test]
fn list_loadso_and_errors() {
    let h = start_daemon();
    let mut client = Client::connect(h.addr);
    client.wait_ready();

    let listing = client.read_listing();
    assert!(listing.contains("0: enumerator"));
    assert!(listing.contains("bb4io"));
    assert!(listing.contains("out4"));

    // Per-slot help text.
    client.send("pclist bb4io\n");
    let help = client.read_until_prompt();
    assert!(help.contains("switches"));

    // The enumerator's drivlist resource answers synchronously.
    client.send("pcget enumerator drivlist\n");
    let drivlist = client.read_until_prompt();
    assert!(drivlist.contains("core 1: 0001 bb4io"));
    assert!(drivlist.contains("core 2: 0002 out4"));

    // Error paths all complete with a prompt.
    client.send("pcbogus\n");
    assert!(client.read_until_prompt().contains("unknown command"));
    client.send("pcget nonesuch outval\n");
    assert!(client.read_until_prompt().contains("unknown slot or driver"));
    client.send("pcget out4 nonesuch\n");
    assert!(client.read_until_prompt().contains("unknown resource"));
    client.send("pcloadso nonesuch\n");
    assert!(client.read_until_prompt().contains("unknown driver"));
    client.send("pcset bb4io buttons 1\n");
    assert!(client.read_until_prompt().contains("not writable"));

    // loadso installs a second out4 instance in the next free slot.
    client.send("pcloadso out4\n");
    assert_eq!(client.read_until_prompt(), "");
    let listing = client.read_listing();
    assert_eq!(listing.matches("out4").count(), 2);
}
