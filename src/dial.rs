//! Decoding of DIAL command data.
//!
//! Each byte carries one dial character in its low nibble: `0..=9` are
//! digits, `0xD` separates fields and `0xC` ends the number. The number has
//! the form `AAA SEP BBB SEP CCC SEP DDD SEP PPPP`, an outgoing call to
//! `AAA.BBB.CCC.DDD` port `PPPP`.

use arrayvec::ArrayVec;
use snafu::{ensure, Snafu};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Maximum number of dial characters kept from a DIAL command.
pub const DIAL_DATA_LEN: usize = 256;

const SEPARATOR: u8 = 0x0D;
const END_OF_NUMBER: u8 = 0x0C;

#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum DialError {
    #[snafu(display("Invalid dial character {:#04x} at position {}", byte, position))]
    InvalidDigit { position: usize, byte: u8 },
    #[snafu(display("Address octet {} is too large ({})", octet, value))]
    OctetTooLarge { octet: usize, value: u32 },
    #[snafu(display("Too many separators, extra one at position {}", position))]
    TooManySeparators { position: usize },
    #[snafu(display("Not enough separators, found {} of 4", found))]
    TooFewSeparators { found: usize },
    #[snafu(display("Port number too large ({})", value))]
    PortTooLarge { value: u32 },
    #[snafu(display("Dial data continues after end of number at position {}", position))]
    DataAfterEnd { position: usize },
}

/// Raw dial characters of the last DIAL command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialData(ArrayVec<u8, DIAL_DATA_LEN>);

impl DialData {
    /// Keep at most [`DIAL_DATA_LEN`] bytes of `data`, the rest is ignored.
    pub fn from_slice(data: &[u8]) -> DialData {
        let len = data.len().min(DIAL_DATA_LEN);
        let mut buf = ArrayVec::new();
        // cannot fail, len is bounded by the capacity
        let _ = buf.try_extend_from_slice(&data[..len]);
        DialData(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the destination of the call.
    ///
    /// An empty field counts as zero.
    /// # Errors
    /// Returns a [`DialError`] describing the first problem found.
    pub fn destination(&self) -> Result<SocketAddrV4, DialError> {
        let mut octets = [0u8; 4];
        let mut found = 0;
        let mut acc: u32 = 0;
        let mut ended = false;

        for (position, &byte) in self.0.iter().enumerate() {
            ensure!(!ended, DataAfterEndSnafu { position });
            match byte & 0x0f {
                digit @ 0..=9 => {
                    acc = acc.saturating_mul(10).saturating_add(u32::from(digit));
                }
                SEPARATOR => {
                    ensure!(found < 4, TooManySeparatorsSnafu { position });
                    ensure!(
                        acc <= 255,
                        OctetTooLargeSnafu {
                            octet: found,
                            value: acc
                        }
                    );
                    octets[found] = acc as u8;
                    found += 1;
                    acc = 0;
                }
                END_OF_NUMBER => ended = true,
                _ => return InvalidDigitSnafu { position, byte }.fail(),
            }
        }
        ensure!(found == 4, TooFewSeparatorsSnafu { found });
        ensure!(acc <= 65535, PortTooLargeSnafu { value: acc });

        let [a, b, c, d] = octets;
        Ok(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), acc as u16))
    }
}
