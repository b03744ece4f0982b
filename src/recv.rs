//! Byte-at-a-time receiver state machine.
//!
//! A single `match self.state` stepped one byte at a time, with a
//! cross-cutting rule layered in before the match: a FLAG byte always
//! resynchronizes the parser back to `FlagRcv`, discarding whatever
//! partial frame was in progress. `accept` is how the same state
//! machine is reused for SET/UA/DISC/I/RR/REJ contexts without
//! duplicating the transition table per context.

use crate::frame::FLAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Start,
    FlagRcv,
    ARcv,
    CRcv,
    BccOk,
    Data,
}

/// Whether an accepted control byte belongs to a supervisory frame
/// (5 fixed octets) or an information frame (payload follows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlKind {
    Supervisory,
    Information,
}

/// Stateless predicate distinguishing the control bytes valid in the
/// caller's current phase (SET-vs-UA, I-vs-RR/REJ, ...) from noise.
pub type CtrlAcceptor = fn(u8) -> Option<CtrlKind>;

/// A frame recognized by the parser, BCC1-verified, not yet destuffed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Supervisory { addr: u8, ctrl: u8 },
    Information { addr: u8, ctrl: u8, stuffed: Vec<u8> },
}

/// Byte-at-a-time parser. One instance is created per expected
/// phase (the caller supplies `expected_addr` and `accept`) and fed
/// bytes via [`FrameParser::step`] until it returns a frame.
pub struct FrameParser {
    state: RxState,
    expected_addr: u8,
    accept: CtrlAcceptor,
    addr_seen: u8,
    ctrl_seen: u8,
    data: Vec<u8>,
}

impl FrameParser {
    pub fn new(expected_addr: u8, accept: CtrlAcceptor) -> Self {
        FrameParser {
            state: RxState::Start,
            expected_addr,
            accept,
            addr_seen: 0,
            ctrl_seen: 0,
            data: Vec::new(),
        }
    }

    /// Feeds one byte into the parser. Returns `Some` exactly when a
    /// complete frame has been recognized; the parser is ready for
    /// the next frame immediately afterward.
    pub fn step(&mut self, byte: u8) -> Option<RawFrame> {
        match self.state {
            RxState::Start => {
                if byte == FLAG {
                    self.state = RxState::FlagRcv;
                }
            }
            RxState::FlagRcv => {
                if byte == FLAG {
                    // stay; repeated FLAGs are harmless filler.
                } else if byte == self.expected_addr {
                    self.addr_seen = byte;
                    self.state = RxState::ARcv;
                } else {
                    self.state = RxState::Start;
                }
            }
            RxState::ARcv => {
                if (self.accept)(byte).is_some() {
                    self.ctrl_seen = byte;
                    self.state = RxState::CRcv;
                } else if byte == FLAG {
                    self.state = RxState::FlagRcv;
                } else {
                    self.state = RxState::Start;
                }
            }
            RxState::CRcv => {
                if byte == self.addr_seen ^ self.ctrl_seen {
                    // An I-frame has no placeholder byte between BCC1
                    // and its payload, so the BCC_OK -> DATA step
                    // happens immediately rather than waiting for a
                    // byte that only supervisory frames send (FLAG).
                    match (self.accept)(self.ctrl_seen) {
                        Some(CtrlKind::Information) => {
                            self.data.clear();
                            self.state = RxState::Data;
                        }
                        _ => self.state = RxState::BccOk,
                    }
                } else if byte == FLAG {
                    self.state = RxState::FlagRcv;
                } else {
                    self.state = RxState::Start;
                }
            }
            RxState::BccOk => {
                if byte == FLAG {
                    self.state = RxState::Start;
                    return Some(RawFrame::Supervisory {
                        addr: self.addr_seen,
                        ctrl: self.ctrl_seen,
                    });
                }
                self.state = RxState::Start;
            }
            RxState::Data => {
                if byte == FLAG {
                    self.state = RxState::Start;
                    return Some(RawFrame::Information {
                        addr: self.addr_seen,
                        ctrl: self.ctrl_seen,
                        stuffed: std::mem::take(&mut self.data),
                    });
                }
                self.data.push(byte);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{bcc1, bcc2, ctrl_i, encode_supervisory, stuff, ADDR_SENDER, CTRL_SET, CTRL_UA};

    fn accept_set_or_ua(ctrl: u8) -> Option<CtrlKind> {
        match ctrl {
            CTRL_SET | CTRL_UA => Some(CtrlKind::Supervisory),
            _ => None,
        }
    }

    fn accept_i(ctrl: u8) -> Option<CtrlKind> {
        match ctrl {
            0x00 | 0x80 => Some(CtrlKind::Information),
            _ => None,
        }
    }

    #[test]
    fn recognizes_a_clean_supervisory_frame() {
        let mut parser = FrameParser::new(ADDR_SENDER, accept_set_or_ua);
        let wire = encode_supervisory(ADDR_SENDER, CTRL_SET);
        let mut last = None;
        for b in wire {
            last = parser.step(b);
        }
        assert_eq!(
            last,
            Some(RawFrame::Supervisory { addr: ADDR_SENDER, ctrl: CTRL_SET })
        );
    }

    #[test]
    fn resynchronizes_on_garbage_before_the_flag() {
        let mut parser = FrameParser::new(ADDR_SENDER, accept_set_or_ua);
        let mut wire = vec![0x11, 0x22, 0x33];
        wire.extend(encode_supervisory(ADDR_SENDER, CTRL_UA));
        let mut last = None;
        for b in wire {
            if let Some(f) = parser.step(b) {
                last = Some(f);
            }
        }
        assert_eq!(last, Some(RawFrame::Supervisory { addr: ADDR_SENDER, ctrl: CTRL_UA }));
    }

    #[test]
    fn bad_bcc1_is_discarded_and_does_not_emit() {
        let mut parser = FrameParser::new(ADDR_SENDER, accept_set_or_ua);
        let wire = [0x7E, ADDR_SENDER, CTRL_SET, 0xFF, 0x7E];
        let mut emitted = None;
        for b in wire {
            if let Some(f) = parser.step(b) {
                emitted = Some(f);
            }
        }
        assert_eq!(emitted, None);
    }

    #[test]
    fn parses_an_information_frame_with_embedded_flag_byte() {
        use crate::frame::FLAG as F;
        let mut parser = FrameParser::new(ADDR_SENDER, accept_i);
        let payload = [F, 0x01, 0x02];
        let checksum = bcc2(&payload);
        let region: Vec<u8> = payload.iter().copied().chain(std::iter::once(checksum)).collect();
        let stuffed = stuff(&region);

        let mut wire = vec![F, ADDR_SENDER, ctrl_i(crate::frame::SequenceBit::ZERO)];
        wire.push(bcc1(ADDR_SENDER, ctrl_i(crate::frame::SequenceBit::ZERO)));
        wire.extend(stuffed);
        wire.push(F);

        let mut last = None;
        for b in wire {
            if let Some(f) = parser.step(b) {
                last = Some(f);
            }
        }
        match last {
            Some(RawFrame::Information { addr, ctrl, stuffed }) => {
                assert_eq!(addr, ADDR_SENDER);
                assert_eq!(ctrl, 0x00);
                let destuffed = crate::frame::destuff(&stuffed).unwrap();
                assert_eq!(destuffed, region);
            }
            other => panic!("expected Information frame, got {:?}", other),
        }
    }
}
