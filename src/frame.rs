//! Byte stuffing, BCC1/BCC2 checksums, and frame envelope encoding.
//!
//! Escaping and checksumming are kept as separate passes: count and
//! escape a reserved byte while folding a running checksum over the
//! unstuffed stream, the way a framed serial protocol typically
//! splits these concerns. Here that means an XOR checksum and a
//! two-reserved-byte (FLAG/ESC) stuffing scheme.

pub const FLAG: u8 = 0x7E;
pub const ESC: u8 = 0x7D;
const STUFF_XOR: u8 = 0x20;

pub const ADDR_SENDER: u8 = 0x03;
pub const ADDR_RECEIVER: u8 = 0x01;

pub const CTRL_SET: u8 = 0x03;
pub const CTRL_UA: u8 = 0x07;
pub const CTRL_DISC: u8 = 0x0B;

/// A single-bit modulo-2 frame number, widened to 0x00/0x80 (and to
/// the RR/REJ control-byte pairs) only at the codec boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceBit(bool);

impl SequenceBit {
    pub const ZERO: SequenceBit = SequenceBit(false);
    pub const ONE: SequenceBit = SequenceBit(true);

    pub fn toggled(self) -> SequenceBit {
        SequenceBit(!self.0)
    }
}

/// Control byte for an I-frame carrying sequence number `seq`.
pub fn ctrl_i(seq: SequenceBit) -> u8 {
    if seq.0 {
        0x80
    } else {
        0x00
    }
}

/// If `ctrl` is an I-frame control byte, its sequence bit.
pub fn i_seq(ctrl: u8) -> Option<SequenceBit> {
    match ctrl {
        0x00 => Some(SequenceBit::ZERO),
        0x80 => Some(SequenceBit::ONE),
        _ => None,
    }
}

/// Control byte for `RR(seq)`.
pub fn ctrl_rr(seq: SequenceBit) -> u8 {
    if seq.0 {
        0xAB
    } else {
        0xAA
    }
}

/// If `ctrl` is an RR control byte, the sequence number it confirms.
pub fn rr_seq(ctrl: u8) -> Option<SequenceBit> {
    match ctrl {
        0xAA => Some(SequenceBit::ZERO),
        0xAB => Some(SequenceBit::ONE),
        _ => None,
    }
}

/// Control byte for `REJ(seq)`.
pub fn ctrl_rej(seq: SequenceBit) -> u8 {
    if seq.0 {
        0x55
    } else {
        0x54
    }
}

/// If `ctrl` is a REJ control byte, the sequence number it rejects.
pub fn rej_seq(ctrl: u8) -> Option<SequenceBit> {
    match ctrl {
        0x54 => Some(SequenceBit::ZERO),
        0x55 => Some(SequenceBit::ONE),
        _ => None,
    }
}

/// BCC1 = A XOR C.
pub fn bcc1(addr: u8, ctrl: u8) -> u8 {
    addr ^ ctrl
}

/// BCC2 = running XOR over the unstuffed payload.
pub fn bcc2(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Escapes FLAG and ESC occurrences in `data` (a payload-plus-BCC2
/// region). Never called on the outer envelope FLAGs themselves.
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            FLAG => {
                out.push(ESC);
                out.push(FLAG ^ STUFF_XOR);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC ^ STUFF_XOR);
            }
            _ => out.push(b),
        }
    }
    out
}

/// A frame-level anomaly absorbed locally by the session loop; never
/// widened into a [`crate::error::LinkError`].
#[derive(Debug)]
pub struct IllFormedEscape;

/// Inverse of [`stuff`]. Rejects an escape sequence whose second byte
/// is anything other than the stuffed form of FLAG or ESC.
pub fn destuff(data: &[u8]) -> Result<Vec<u8>, IllFormedEscape> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied();
    while let Some(b) = iter.next() {
        if b == ESC {
            match iter.next() {
                Some(next) if next == (FLAG ^ STUFF_XOR) || next == (ESC ^ STUFF_XOR) => {
                    out.push(next ^ STUFF_XOR);
                }
                _ => return Err(IllFormedEscape),
            }
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Builds the 5-octet envelope for a supervisory frame (SET, UA,
/// DISC, RR, REJ — anything with no payload).
pub fn encode_supervisory(addr: u8, ctrl: u8) -> Vec<u8> {
    vec![FLAG, addr, ctrl, bcc1(addr, ctrl), FLAG]
}

/// Builds the envelope for an I-frame: header, then the stuffed
/// `payload ∥ bcc2` region, then the closing FLAG.
pub fn encode_information(addr: u8, seq: SequenceBit, payload: &[u8]) -> Vec<u8> {
    let ctrl = ctrl_i(seq);
    let checksum = bcc2(payload);
    let mut region = Vec::with_capacity(payload.len() + 1);
    region.extend_from_slice(payload);
    region.push(checksum);
    let stuffed = stuff(&region);

    let mut out = Vec::with_capacity(4 + stuffed.len() + 1);
    out.push(FLAG);
    out.push(addr);
    out.push(ctrl);
    out.push(bcc1(addr, ctrl));
    out.extend_from_slice(&stuffed);
    out.push(FLAG);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuff_then_destuff_round_trips() {
        let payload = [0x7E, 0x7D, 0x41, 0x42];
        let region: Vec<u8> = payload
            .iter()
            .copied()
            .chain(std::iter::once(bcc2(&payload)))
            .collect();
        let stuffed = stuff(&region);
        let recovered = destuff(&stuffed).unwrap();
        assert_eq!(recovered, region);
    }

    #[test]
    fn stuffing_with_reserved_bytes_in_payload() {
        // Payload 7E 7D 41 42; bcc2 = 7E ^ 7D ^ 41 ^ 42 = 0x50.
        let payload = [0x7Eu8, 0x7D, 0x41, 0x42];
        assert_eq!(bcc2(&payload), 0x50);
        let region: Vec<u8> = payload.iter().copied().chain(std::iter::once(0x50)).collect();
        let stuffed = stuff(&region);
        // 7E -> 7D 5E, 7D -> 7D 5D, 41/42/50 unstuffed (none are reserved).
        assert_eq!(stuffed, vec![0x7D, 0x5E, 0x7D, 0x5D, 0x41, 0x42, 0x50]);
    }

    #[test]
    fn destuff_rejects_bad_escape() {
        let bad = [ESC, 0x99];
        assert!(destuff(&bad).is_err());
    }

    #[test]
    fn bcc1_is_xor_of_address_and_control() {
        assert_eq!(bcc1(ADDR_SENDER, CTRL_SET), 0x03 ^ 0x03);
    }

    #[test]
    fn sequence_bit_round_trips_through_control_bytes() {
        assert_eq!(i_seq(ctrl_i(SequenceBit::ZERO)), Some(SequenceBit::ZERO));
        assert_eq!(i_seq(ctrl_i(SequenceBit::ONE)), Some(SequenceBit::ONE));
        assert_eq!(rr_seq(ctrl_rr(SequenceBit::ZERO)), Some(SequenceBit::ZERO));
        assert_eq!(rej_seq(ctrl_rej(SequenceBit::ONE)), Some(SequenceBit::ONE));
    }

    #[test]
    fn clean_handshake_wire_bytes() {
        // Scenario 1: tx sends 7E 03 03 00 7E; rx replies 7E 03 07 04 7E.
        assert_eq!(encode_supervisory(ADDR_SENDER, CTRL_SET), vec![0x7E, 0x03, 0x03, 0x00, 0x7E]);
        assert_eq!(encode_supervisory(ADDR_SENDER, CTRL_UA), vec![0x7E, 0x03, 0x07, 0x04, 0x7E]);
    }
}
