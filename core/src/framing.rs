use crate::error::{Result, StegoError, SyncFailure};

/// Synchronization pattern: 10101010 11110000 10101010
pub const PREAMBLE: [bool; PREAMBLE_BITS] = [
    true, false, true, false, true, false, true, false, //
    true, true, true, true, false, false, false, false, //
    true, false, true, false, true, false, true, false,
];

pub const PREAMBLE_BITS: usize = 24;

/// Big-endian payload byte count
pub const LENGTH_FIELD_BITS: usize = 16;

/// 8 data bits followed by their XOR parity bit
pub const BITS_PER_BYTE_GROUP: usize = 9;

pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Bits needed to carry a payload of `payload_len` bytes, preamble included.
pub fn frame_bit_len(payload_len: usize) -> usize {
    PREAMBLE_BITS + LENGTH_FIELD_BITS + payload_len * BITS_PER_BYTE_GROUP
}

fn parity(bits: &[bool]) -> bool {
    bits.iter().fold(false, |acc, &bit| acc ^ bit)
}

fn push_byte(bits: &mut Vec<bool>, byte: u8) {
    for i in (0..8).rev() {
        bits.push((byte >> i) & 1 == 1);
    }
}

fn bits_to_byte(bits: &[bool]) -> u8 {
    bits.iter()
        .fold(0u8, |byte, &bit| (byte << 1) | u8::from(bit))
}

/// Read the length field of a frame whose first bit is the first preamble bit.
pub fn read_length_field(frame_bits: &[bool]) -> Option<usize> {
    let field = frame_bits.get(PREAMBLE_BITS..PREAMBLE_BITS + LENGTH_FIELD_BITS)?;
    let high = bits_to_byte(&field[..8]) as usize;
    let low = bits_to_byte(&field[8..]) as usize;
    Some((high << 8) | low)
}

pub struct FrameEncoder;
pub struct FrameDecoder;

impl FrameEncoder {
    /// Serialize a payload into preamble + length + (data, parity) groups
    pub fn build_frame(payload: &[u8]) -> Result<Vec<bool>> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(StegoError::FormatError(format!(
                "payload of {} bytes exceeds frame limit of {}",
                payload.len(),
                MAX_FRAME_PAYLOAD
            )));
        }

        let mut bits = Vec::with_capacity(frame_bit_len(payload.len()));
        bits.extend_from_slice(&PREAMBLE);

        let len = payload.len() as u16;
        push_byte(&mut bits, (len >> 8) as u8);
        push_byte(&mut bits, len as u8);

        for &byte in payload {
            push_byte(&mut bits, byte);
            let group_start = bits.len() - 8;
            let p = parity(&bits[group_start..]);
            bits.push(p);
        }

        Ok(bits)
    }
}

impl FrameDecoder {
    /// Preamble bits allowed to differ before the frame is treated as unsynchronized
    pub fn preamble_allowance(error_tolerance: f32) -> usize {
        (PREAMBLE_BITS as f32 * error_tolerance).floor() as usize
    }

    /// Parse a frame whose first bit is the first preamble bit.
    ///
    /// Parity only detects errors. Groups whose parity mismatches are returned
    /// as received; the frame is rejected only when the mismatch ratio exceeds
    /// `error_tolerance`.
    pub fn parse_frame(bits: &[bool], error_tolerance: f32) -> Result<Vec<u8>> {
        if bits.len() < PREAMBLE_BITS + LENGTH_FIELD_BITS {
            return Err(StegoError::SyncError(SyncFailure::ShortHeader { bits: bits.len() }));
        }

        let preamble_errors = bits[..PREAMBLE_BITS]
            .iter()
            .zip(PREAMBLE.iter())
            .filter(|(a, b)| a != b)
            .count();
        let allowed = Self::preamble_allowance(error_tolerance);
        if preamble_errors > allowed {
            return Err(StegoError::SyncError(SyncFailure::PreambleMismatch {
                mismatches: preamble_errors,
                allowed,
            }));
        }

        let payload_len = read_length_field(bits).ok_or(StegoError::SyncError(
            SyncFailure::ShortHeader { bits: bits.len() },
        ))?;
        let needed = frame_bit_len(payload_len);
        if bits.len() < needed {
            return Err(StegoError::SyncError(SyncFailure::Truncated {
                present: bits.len(),
                needed,
            }));
        }

        let body = &bits[PREAMBLE_BITS + LENGTH_FIELD_BITS..needed];
        let mut payload = Vec::with_capacity(payload_len);
        let mut mismatches = 0usize;

        for group in body.chunks_exact(BITS_PER_BYTE_GROUP) {
            let (data, received_parity) = group.split_at(8);
            if parity(data) != received_parity[0] {
                mismatches += 1;
            }
            payload.push(bits_to_byte(data));
        }

        let total = payload_len;
        if total > 0 && mismatches as f32 / total as f32 > error_tolerance {
            return Err(StegoError::ParityError { mismatches, total });
        }
        if mismatches > 0 {
            log::debug!(
                "Accepted frame with {}/{} parity mismatches",
                mismatches,
                total
            );
        }

        Ok(payload)
    }
}
