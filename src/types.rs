//! This module defines the channel-command vocabulary of the line: command
//! codes, unit status, sense bytes and the completion record returned for
//! every executed command.

use snafu::Snafu;

use core::convert::TryFrom;
use core::fmt;
use core::ops::BitOr;
use core::time::Duration;

/// Error type for this module
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The byte isn't a command code understood by the line.
    #[snafu(display("Unknown command code {:#04x}", code))]
    UnknownCommand { code: u8 },
}

/// Channel command codes accepted by the line.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
#[repr(u8)]
pub enum Command {
    Write = 0x01,
    Read = 0x02,
    NoOp = 0x03,
    Sense = 0x04,
    Prepare = 0x06,
    Poll = 0x09,
    SetMode = 0x23,
    Enable = 0x27,
    Dial = 0x29,
    Disable = 0x2F,
    SenseId = 0xE4,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        use Command::*;
        Ok(match code {
            0x01 => Write,
            0x02 => Read,
            0x03 => NoOp,
            0x04 => Sense,
            0x06 => Prepare,
            0x09 => Poll,
            0x23 => SetMode,
            0x27 => Enable,
            0x29 => Dial,
            0x2F => Disable,
            0xE4 => SenseId,
            _ => return UnknownCommandSnafu { code }.fail(),
        })
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

/// Unit status byte, as presented to the channel.
#[derive(PartialEq, Eq, Copy, Clone, Hash, Default)]
#[repr(transparent)]
pub struct UnitStatus(u8);

impl UnitStatus {
    pub const STATUS_MODIFIER: UnitStatus = UnitStatus(0x40);
    pub const CHANNEL_END: UnitStatus = UnitStatus(0x08);
    pub const DEVICE_END: UnitStatus = UnitStatus(0x04);
    pub const UNIT_CHECK: UnitStatus = UnitStatus(0x02);
    pub const UNIT_EXCEPTION: UnitStatus = UnitStatus(0x01);

    /// Channel end + device end, the normal ending status.
    pub const DONE: UnitStatus = UnitStatus(0x0C);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: UnitStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_unit_check(self) -> bool {
        self.contains(Self::UNIT_CHECK)
    }

    pub const fn is_unit_exception(self) -> bool {
        self.contains(Self::UNIT_EXCEPTION)
    }
}

impl BitOr for UnitStatus {
    type Output = UnitStatus;

    fn bitor(self, rhs: UnitStatus) -> UnitStatus {
        UnitStatus(self.0 | rhs.0)
    }
}

impl From<UnitStatus> for u8 {
    fn from(status: UnitStatus) -> u8 {
        status.0
    }
}

impl fmt::Debug for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(UnitStatus, &str); 5] = [
            (UnitStatus::STATUS_MODIFIER, "SM"),
            (UnitStatus::CHANNEL_END, "CE"),
            (UnitStatus::DEVICE_END, "DE"),
            (UnitStatus::UNIT_CHECK, "UC"),
            (UnitStatus::UNIT_EXCEPTION, "UX"),
        ];
        write!(f, "UnitStatus({:#04x}", self.0)?;
        for (bit, name) in NAMES.iter() {
            if self.contains(*bit) {
                write!(f, " {}", name)?;
            }
        }
        write!(f, ")")
    }
}

/// Sense byte 0: command reject.
pub const SENSE_CR: u8 = 0x80;
/// Sense byte 0: intervention required.
pub const SENSE_IR: u8 = 0x40;

/// Two sense bytes kept by the line for a following SENSE command.
pub type Sense = [u8; 2];

/// The outcome of one executed channel command.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Completion {
    pub status: UnitStatus,
    /// Bytes of the command buffer that were not transferred.
    pub residual: usize,
    /// More data is available for a chained command.
    pub more: bool,
}

impl Completion {
    pub(crate) const fn new(status: UnitStatus, residual: usize) -> Self {
        Completion {
            status,
            residual,
            more: false,
        }
    }

    pub(crate) const fn done(residual: usize) -> Self {
        Self::new(UnitStatus::DONE, residual)
    }

    pub(crate) fn check(residual: usize) -> Self {
        Self::new(UnitStatus::DONE | UnitStatus::UNIT_CHECK, residual)
    }

    pub(crate) fn exception(residual: usize) -> Self {
        Self::new(UnitStatus::DONE | UnitStatus::UNIT_EXCEPTION, residual)
    }
}

/// Dial capability of a line.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum DialMode {
    /// Leased line: connects out on ENABLE and accepts the peer unconditionally.
    No,
    In,
    Out,
    InOut,
}

impl DialMode {
    pub const fn dial_in(self) -> bool {
        matches!(self, DialMode::In | DialMode::InOut)
    }

    pub const fn dial_out(self) -> bool {
        matches!(self, DialMode::Out | DialMode::InOut)
    }

    /// Whether the line keeps a listening socket for incoming calls.
    pub const fn listens(self) -> bool {
        !matches!(self, DialMode::Out)
    }
}

impl fmt::Display for DialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialMode::No => "NO",
            DialMode::In => "IN",
            DialMode::Out => "OUT",
            DialMode::InOut => "INOUT",
        };
        f.write_str(name)
    }
}

/// Wait bound for a network operation.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum Timeout {
    /// Wait until some event ends the operation.
    Infinite,
    /// Return as soon as possible.
    Immediate,
    After(Duration),
}

impl Timeout {
    /// Convert a host-style millisecond value: 0 is infinite, negative is immediate.
    pub fn from_millis(ms: i64) -> Timeout {
        match ms {
            0 => Timeout::Infinite,
            ms if ms < 0 => Timeout::Immediate,
            ms => Timeout::After(Duration::from_millis(ms as u64)),
        }
    }

    pub(crate) fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::Immediate => Some(Duration::from_micros(1)),
            Timeout::After(d) => Some(d),
        }
    }
}

/// Residual count for a transfer of `num` out of `count` bytes.
pub(crate) fn residual(count: usize, num: usize) -> usize {
    count.saturating_sub(num)
}
