//! Emulation of a half-duplex BSC (binary synchronous) line adapter, with the
//! communication line carried over TCP.
//!
//! A [`BscLine`] accepts the channel commands of a 2703-style transmission
//! control unit (ENABLE, DIAL, POLL, READ, WRITE, ...) and translates them to
//! operations on a TCP connection to a peer line. Each line runs one network
//! worker thread, commands are executed synchronously from the caller's thread
//! and can be halted from any other thread through a [`HaltHandle`].
//!
//! The line discipline, framing of received data and escaping of transparent
//! text is in [`codec`]. Line settings are given as a validated
//! [`LineConfig`].

use snafu::Snafu;
use std::io;

mod buffer;
pub mod codec;
pub mod config;
pub mod dial;
pub mod ebcdic;
mod line;
mod nom_parser;
mod state;
pub mod types;
mod worker;

pub use buffer::ByteRing;
pub use config::{ConfigProblem, LineConfig};
pub use line::{BscLine, HaltHandle};
pub use types::{Command, Completion, DialMode, Timeout, UnitStatus};

/// Error type for opening a line.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The line configuration has one or more problems, all are listed.
    #[snafu(display("Invalid line configuration: {:?}", problems))]
    InvalidConfig { problems: Vec<ConfigProblem> },
    /// The local port for incoming calls couldn't be bound.
    #[snafu(display("Cannot listen on port {}: {}", port, source))]
    Listen { port: u16, source: io::Error },
    #[snafu(display("Readiness poller failed: {}", source))]
    Poll { source: io::Error },
    #[snafu(display("Cannot start the line worker: {}", source))]
    Spawn { source: io::Error },
    /// The worker stopped before the line was ready.
    #[snafu(display("Line worker failed to initialize"))]
    WorkerInit,
}

/// A device that executes channel commands.
pub trait ChannelDevice {
    /// Execute the command `code` with the data area `buffer`, whose length
    /// is the command byte count.
    fn execute(&mut self, code: u8, buffer: &mut [u8]) -> Completion;
}

/// A device whose commands in progress can be halted.
pub trait HaltDevice {
    /// Abort the command in progress, it ends with unit exception. Returns
    /// once the device has acknowledged the halt. Does nothing if no command
    /// is in progress.
    fn halt(&self);
}
