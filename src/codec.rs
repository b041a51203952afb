//! Wire-level message codec. All multi-byte fields are big-endian; byte 0
//! of every frame is the message id.

/// Message identifiers, byte 0 of every frame.
pub const MSG_ID_UNKNOWN: u8 = 0;
pub const MSG_ID_START: u8 = 1;
pub const MSG_ID_ACK: u8 = 2;
pub const MSG_ID_DATA: u8 = 3;

/// Size of every outbound ACK frame.
pub const ACK_MESSAGE_SIZE: usize = 8;

/// A parsed inbound frame. `Data`'s payload borrows from the caller's inbound
/// slot and must not outlive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message<'a> {
    /// Opens a DFU session, declaring the expected image size and CRC.
    Start { app_size: u32, app_crc: u32 },
    /// One payload slice with a modulo-256 sequence number.
    Data { sequence_number: u8, payload: &'a [u8] },
    /// A device-to-host frame arrived inbound (never legitimately sent by a
    /// host, but decodable for completeness).
    Ack,
    /// Any id the codec does not recognize, or a malformed START. The state
    /// machine, not the codec, is responsible for rejecting it.
    Unknown,
}

/// Parses `buffer[..size]` into a [`Message`]. Never panics on malformed
/// input; a too-short or unrecognized frame decodes to `Message::Unknown`.
pub fn parse(buffer: &[u8], size: usize) -> Message<'_> {
    let buffer = &buffer[..size];
    let Some(&id) = buffer.first() else {
        return Message::Unknown;
    };

    match id {
        MSG_ID_START => {
            if buffer.len() < 8 {
                return Message::Unknown;
            }
            let app_size = u32::from_be_bytes([0, buffer[1], buffer[2], buffer[3]]);
            let app_crc = u32::from_be_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
            Message::Start { app_size, app_crc }
        }
        MSG_ID_DATA => {
            if buffer.len() < 3 {
                return Message::Unknown;
            }
            Message::Data {
                sequence_number: buffer[1],
                payload: &buffer[2..],
            }
        }
        MSG_ID_ACK => Message::Ack,
        _ => Message::Unknown,
    }
}

/// Writes a big-endian 32-bit CRC into a 4-byte buffer.
pub fn pack_crc_into(buf: &mut [u8; 4], crc: u32) {
    *buf = crc.to_be_bytes();
}

/// Builds an 8-byte ACK frame: `[0x02, error, m0, m1, m2, m3, 0, 0]`.
/// `metadata` is zero-filled when `None`. Fails with
/// [`crate::Error::InvalidArgument`]-equivalent `false` when `out` is
/// shorter than [`ACK_MESSAGE_SIZE`]; the core never constructs a shorter
/// buffer, so this is an assertion boundary rather than a runtime-reachable
/// path for correctly wired callers.
pub fn build_ack(error: u8, metadata: Option<[u8; 4]>, out: &mut [u8]) -> bool {
    if out.len() < ACK_MESSAGE_SIZE {
        return false;
    }
    out[0] = MSG_ID_ACK;
    out[1] = error;
    let meta = metadata.unwrap_or([0; 4]);
    out[2..6].copy_from_slice(&meta);
    out[6] = 0;
    out[7] = 0;
    true
}
