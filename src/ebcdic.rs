//! EBCDIC line-control characters used by the BSC discipline.

/// Start of heading.
pub const SOH: u8 = 0x01;
/// Start of text.
pub const STX: u8 = 0x02;
/// End of text.
pub const ETX: u8 = 0x03;
/// Data link escape, the escape marker for control sequences and transparent text.
pub const DLE: u8 = 0x10;
/// Intermediate text block.
pub const ITB: u8 = 0x1F;
/// End of transmission block.
pub const ETB: u8 = 0x26;
/// Enquiry.
pub const ENQ: u8 = 0x2D;
/// Synchronous idle, filler between frames.
pub const SYN: u8 = 0x32;
/// End of transmission.
pub const EOT: u8 = 0x37;
/// Negative acknowledgement.
pub const NAK: u8 = 0x3D;

/// `DLE x` where `x` is in this range is a two-byte line-control sequence
/// (ACK0, ACK1, WACK, RVI, ...).
pub(crate) const fn is_control_sequence(b: u8) -> bool {
    let high = b & 0xf0;
    high == 0x60 || high == 0x70
}
