//! BSC line discipline.
//!
//! The [`Decoder`] turns raw line bytes into the data handed to READ commands
//! and finds the frame boundaries that end a read. [`encode()`] prepares WRITE
//! data for the line, escaping DLE inside transparent text.

use log::trace;

use crate::buffer::ByteRing;
use crate::ebcdic::*;

/// Receive mode of the line.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Mode {
    /// Between frames.
    Idle,
    /// After SOH or STX.
    Text,
    /// Transparent text, entered with DLE STX.
    Transparent,
}

/// Why decoding stopped before the input ran out.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Boundary {
    /// End of a block or a control sequence, the read can complete.
    Frame,
    /// EOT received outside of text. Not copied to the output.
    EndOfTransmission,
}

#[derive(Debug)]
pub struct Decoder {
    mode: Mode,
    dle_pending: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder {
            mode: Mode::Idle,
            dle_pending: false,
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Decode bytes from `input` into `output` until a boundary is found or
    /// the input is empty. Bytes after the boundary stay in `input`.
    ///
    /// With `eib` set, a zero pad byte follows every ITB, ETB and ETX.
    pub fn decode(
        &mut self,
        input: &mut ByteRing,
        output: &mut ByteRing,
        eib: bool,
    ) -> Option<Boundary> {
        while let Some(b) = input.pop() {
            if let Some(boundary) = self.feed(b, output, eib) {
                trace!("Frame boundary {:?} at {:02x?}, now {:?}", boundary, b, self.mode);
                return Some(boundary);
            }
        }
        None
    }

    /// Decode a single byte.
    pub fn feed(&mut self, b: u8, out: &mut ByteRing, eib: bool) -> Option<Boundary> {
        if !self.dle_pending && b == DLE {
            self.dle_pending = true;
            return None;
        }
        match self.mode {
            Mode::Transparent => {
                let escaped = std::mem::take(&mut self.dle_pending);
                self.transparent(b, escaped, out, eib)
            }
            // SYN fill, a pending DLE stays pending
            _ if b == SYN => None,
            Mode::Text => {
                let escaped = std::mem::take(&mut self.dle_pending);
                self.text(b, escaped, out, eib)
            }
            Mode::Idle => {
                let escaped = std::mem::take(&mut self.dle_pending);
                self.idle(b, escaped, out)
            }
        }
    }

    fn idle(&mut self, b: u8, escaped: bool, out: &mut ByteRing) -> Option<Boundary> {
        if escaped {
            // any other DLE pair outside text is line noise, both bytes go
            if is_control_sequence(b) {
                out.push_slice(&[DLE, b]);
                return Some(Boundary::Frame);
            }
            if b == STX {
                out.push_slice(&[DLE, b]);
                self.mode = Mode::Transparent;
            }
            return None;
        }
        match b {
            EOT => return Some(Boundary::EndOfTransmission),
            SOH | STX => self.mode = Mode::Text,
            ENQ | NAK => {
                out.push(b);
                return Some(Boundary::Frame);
            }
            _ => (),
        }
        out.push(b);
        None
    }

    fn text(&mut self, b: u8, escaped: bool, out: &mut ByteRing, eib: bool) -> Option<Boundary> {
        if escaped {
            out.push_slice(&[DLE, b]);
            return match b {
                STX => {
                    self.mode = Mode::Transparent;
                    None
                }
                ENQ => Some(Boundary::Frame),
                b if is_control_sequence(b) => Some(Boundary::Frame),
                _ => None,
            };
        }
        out.push(b);
        match b {
            ENQ => {
                self.mode = Mode::Idle;
                Some(Boundary::Frame)
            }
            NAK => Some(Boundary::Frame),
            ETB | ETX => {
                pad(out, eib);
                self.mode = Mode::Idle;
                Some(Boundary::Frame)
            }
            // intermediate block, the read goes on
            ITB => {
                pad(out, eib);
                None
            }
            _ => None,
        }
    }

    fn transparent(
        &mut self,
        b: u8,
        escaped: bool,
        out: &mut ByteRing,
        eib: bool,
    ) -> Option<Boundary> {
        if !escaped {
            out.push(b);
            return None;
        }
        match b {
            DLE => {
                out.push(DLE);
                None
            }
            SYN => None,
            ITB => {
                self.mode = Mode::Text;
                out.push_slice(&[DLE, b]);
                pad(out, eib);
                None
            }
            ETB | ETX => {
                self.mode = Mode::Idle;
                out.push_slice(&[DLE, b]);
                pad(out, eib);
                Some(Boundary::Frame)
            }
            ENQ => {
                self.mode = Mode::Idle;
                out.push_slice(&[DLE, b]);
                Some(Boundary::Frame)
            }
            _ => {
                out.push_slice(&[DLE, b]);
                None
            }
        }
    }
}

fn pad(out: &mut ByteRing, eib: bool) {
    if eib {
        out.push(0);
    }
}

/// Copy WRITE data to `out`.
///
/// Every write starts in non-transparent text. DLE STX switches to
/// transparent text, after which each DLE in the data is sent twice.
/// Returns true when the data switched to transparent text.
pub fn encode(data: &[u8], out: &mut ByteRing) -> bool {
    let mut transparent = false;
    let mut got_dle = false;
    for &b in data {
        if transparent {
            if b == DLE {
                out.push(DLE);
            }
        } else {
            if got_dle && b == STX {
                transparent = true;
            }
            got_dle = !got_dle && b == DLE;
        }
        out.push(b);
    }
    transparent
}
