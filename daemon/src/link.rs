// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The serial link to the FPGA. Owns the nonblocking fd, the receive-side
//! [`Deframer`], and the transmit primitive. At most one request is in
//! flight; the daemon never buffers unsent packets — a transmit that would
//! block reports [`SendError::Busy`] and the caller retries from a timer.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use fpgamux_wire::{DeframeEvent, Deframer, Packet, stuff_frame};
use mio::unix::SourceFd;
use mio::{Interest, Registry};
use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;
use smallvec::SmallVec;
use tracing::warn;

use crate::reactor::TOK_SERIAL;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("cannot open serial port {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("serial port {port} closed by peer")]
    Eof { port: String },

    #[error("read error on serial port {port}: {source}")]
    Read { port: String, source: io::Error },
}

/// Transmit outcome a driver must distinguish: retry later versus give up.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The link would block (or accepted only part of the frame). Retry
    /// from a timer; nothing was buffered.
    #[error("serial link busy")]
    Busy,

    /// The link is gone. Fatal: without the FPGA there is nothing to
    /// multiplex.
    #[error("serial link closed: {0}")]
    Closed(io::Error),
}

#[derive(Debug)]
pub struct SerialLink {
    fd: OwnedFd,
    name: String,
    deframer: Deframer,
}

impl SerialLink {
    /// Open a serial device read/write, nonblocking, without becoming its
    /// controlling terminal. Byte-level line configuration is left to the
    /// operator.
    ///
    /// # Errors
    ///
    /// Fails when the device cannot be opened.
    pub fn open(path: &Path) -> Result<Self, LinkError> {
        let fd = rustix::fs::open(
            path,
            OFlags::RDWR | OFlags::NONBLOCK | OFlags::NOCTTY,
            Mode::empty(),
        )
        .map_err(|errno| LinkError::Open {
            path: path.display().to_string(),
            source: io::Error::from(errno),
        })?;
        Ok(Self {
            fd,
            name: path.display().to_string(),
            deframer: Deframer::new(),
        })
    }

    /// Wrap an already-open fd (a pty or socketpair in tests). The fd is
    /// switched to nonblocking here.
    ///
    /// # Errors
    ///
    /// Fails when the fd flags cannot be changed.
    pub fn from_fd(fd: OwnedFd, name: impl Into<String>) -> io::Result<Self> {
        let flags = rustix::fs::fcntl_getfl(&fd)?;
        rustix::fs::fcntl_setfl(&fd, flags | OFlags::NONBLOCK)?;
        Ok(Self {
            fd,
            name: name.into(),
            deframer: Deframer::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub fn raw_fd(&self) -> RawFd { self.fd.as_fd().as_raw_fd() }

    /// Register for readability on the reactor.
    ///
    /// # Errors
    ///
    /// Surfaces the OS registration failure.
    pub fn register(&self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut SourceFd(&self.raw_fd()), TOK_SERIAL, Interest::READABLE)
    }

    /// Drain everything currently readable and return the complete frames.
    /// Short reads are normal; `EAGAIN` ends the drain. Protocol violations
    /// are logged with the port name and the partial frame dropped. EOF or
    /// any other read error is fatal.
    ///
    /// # Errors
    ///
    /// [`LinkError::Eof`] / [`LinkError::Read`] mean the link is lost.
    pub fn pump_rx(&mut self) -> Result<SmallVec<[Vec<u8>; 4]>, LinkError> {
        let mut frames = SmallVec::new();
        let mut buf = [0u8; 512];
        loop {
            match rustix::io::read(&self.fd, &mut buf) {
                Ok(0) => return Err(LinkError::Eof { port: self.name.clone() }),
                Ok(n) => {
                    for &byte in &buf[..n] {
                        match self.deframer.push(byte) {
                            Some(DeframeEvent::Frame(frame)) => frames.push(frame),
                            Some(DeframeEvent::Violation(violation)) => {
                                warn!(port = %self.name, "link protocol violation: {violation}");
                            }
                            None => {}
                        }
                    }
                }
                Err(errno) if errno == Errno::INTR => {}
                Err(errno) if errno == Errno::AGAIN => break,
                Err(errno) => {
                    return Err(LinkError::Read {
                        port: self.name.clone(),
                        source: io::Error::from(errno),
                    });
                }
            }
        }
        Ok(frames)
    }

    /// Stuff and transmit one request packet. Partial writes count as
    /// [`SendError::Busy`]: the frame is abandoned whole and the caller
    /// retries, so no half-frame lingers in daemon state.
    ///
    /// # Errors
    ///
    /// [`SendError::Busy`] to retry later, [`SendError::Closed`] when the
    /// link is gone.
    pub fn send_packet(&mut self, pkt: &Packet) -> Result<(), SendError> {
        let frame = stuff_frame(&pkt.to_request_bytes());
        match rustix::io::write(&self.fd, &frame) {
            Ok(n) if n == frame.len() => Ok(()),
            Ok(_) => Err(SendError::Busy),
            Err(errno) if errno == Errno::AGAIN => Err(SendError::Busy),
            Err(errno) => Err(SendError::Closed(io::Error::from(errno))),
        }
    }
}
