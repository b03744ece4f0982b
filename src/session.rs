//! Link session: `open_session` / `send_payload` / `recv_payload` /
//! `close_session`.
//!
//! `Session` is the one type application code holds for the duration
//! of a transfer: the open device, the sequence bits, and a
//! [`RetryTimer`], driven through four explicit phase methods rather
//! than one continuously-polled loop, since this protocol allows only
//! a single frame in flight rather than a pipelined window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::LinkError;
use crate::frame::{
    self, ctrl_rej, ctrl_rr, encode_information, encode_supervisory, i_seq, rej_seq, rr_seq,
    SequenceBit, ADDR_RECEIVER, ADDR_SENDER, CTRL_DISC, CTRL_SET, CTRL_UA,
};
use crate::recv::{CtrlKind, FrameParser, RawFrame};
use crate::serial::{BaudRate, SerialAdapter};
use crate::timer::{RetryTimer, TimerEvent};

/// Only one session backed by an adapter that
/// [`SerialAdapter::enforces_single_session`] may be open process-wide
/// at a time.
static SESSION_OPEN: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Transmitter,
    Receiver,
}

/// Immutable-after-open session parameters.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub role: Role,
    pub serial_port_name: String,
    pub baud_rate: BaudRate,
    pub timeout: Duration,
    pub max_retransmissions: u32,
}

/// These counters are always maintained (the retry driver and
/// duplicate filter already need them) and are only conditionally
/// *printed* by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStats {
    pub frames_sent: u32,
    pub frames_retransmitted: u32,
    pub frames_rejected: u32,
    pub timeouts: u32,
    pub bytes_transferred: u64,
}

fn accept_ctrl(ctrl: u8) -> Option<CtrlKind> {
    if ctrl == CTRL_SET || ctrl == CTRL_UA {
        Some(CtrlKind::Supervisory)
    } else {
        None
    }
}

fn accept_disc(ctrl: u8) -> Option<CtrlKind> {
    if ctrl == CTRL_DISC {
        Some(CtrlKind::Supervisory)
    } else {
        None
    }
}

fn accept_ua(ctrl: u8) -> Option<CtrlKind> {
    if ctrl == CTRL_UA {
        Some(CtrlKind::Supervisory)
    } else {
        None
    }
}

fn accept_rr_or_rej(ctrl: u8) -> Option<CtrlKind> {
    if rr_seq(ctrl).is_some() || rej_seq(ctrl).is_some() {
        Some(CtrlKind::Supervisory)
    } else {
        None
    }
}

fn accept_information(ctrl: u8) -> Option<CtrlKind> {
    if i_seq(ctrl).is_some() {
        Some(CtrlKind::Information)
    } else {
        None
    }
}

/// A link session bound to one open serial device.
pub struct Session<S: SerialAdapter> {
    name: String,
    params: SessionParams,
    port: S,
    tx_sequence_bit: SequenceBit,
    rx_expected_bit: SequenceBit,
    stats: TransferStats,
    /// Whether this instance acquired `SESSION_OPEN` and must release
    /// it on drop. Only adapters with `enforces_single_session() ==
    /// true` (real devices) ever set this.
    holds_guard: bool,
}

impl<S: SerialAdapter> Session<S> {
    /// Runs the SET/UA (or, on the receiver side, await-SET/send-UA)
    /// handshake over an already-open device and returns a session
    /// ready for `send_payload`/`recv_payload`.
    pub fn open(port: S, params: SessionParams) -> Result<Self, LinkError> {
        let holds_guard = S::enforces_single_session();
        if holds_guard
            && SESSION_OPEN
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(LinkError::DeviceUnavailable(
                "a link session is already open in this process".into(),
            ));
        }

        let name = format!("llframe::{:?}", params.role);
        let mut session = Session {
            name,
            params,
            port,
            tx_sequence_bit: SequenceBit::ZERO,
            rx_expected_bit: SequenceBit::ZERO,
            stats: TransferStats::default(),
            holds_guard,
        };

        let result = match session.params.role {
            Role::Transmitter => session.open_as_transmitter(),
            Role::Receiver => session.open_as_receiver(),
        };

        // On failure `session` (and with it the guard, via `Drop`) is
        // released when the closure below drops it unused.
        result.map(|()| session)
    }

    fn open_as_transmitter(&mut self) -> Result<(), LinkError> {
        let set_frame = encode_supervisory(ADDR_SENDER, CTRL_SET);
        self.port.write_bytes(&set_frame)?;
        debug!(target: self.name.as_str(), "sent SET, awaiting UA");

        let mut timer = RetryTimer::new(self.params.timeout, self.params.max_retransmissions);
        timer.start();
        let mut parser = FrameParser::new(ADDR_SENDER, accept_ua);

        loop {
            if let Some(byte) = self.port.read_one()? {
                if let Some(frame) = parser.step(byte) {
                    if let RawFrame::Supervisory { ctrl, .. } = frame {
                        if ctrl == CTRL_UA {
                            debug!(target: self.name.as_str(), "received UA, link open");
                            return Ok(());
                        }
                    }
                }
            }
            match timer.poll() {
                TimerEvent::NotExpired => {}
                TimerEvent::Retry => {
                    warn!(target: self.name.as_str(), "SET timed out, retransmitting");
                    self.port.write_bytes(&set_frame)?;
                }
                TimerEvent::Exhausted => {
                    return Err(LinkError::TimeoutExceeded(self.params.max_retransmissions));
                }
            }
        }
    }

    fn open_as_receiver(&mut self) -> Result<(), LinkError> {
        let mut parser = FrameParser::new(ADDR_SENDER, accept_ctrl);
        loop {
            if let Some(byte) = self.port.read_one()? {
                if let Some(RawFrame::Supervisory { ctrl, .. }) = parser.step(byte) {
                    if ctrl == CTRL_SET {
                        debug!(target: self.name.as_str(), "received SET, sending UA");
                        self.port.write_bytes(&encode_supervisory(ADDR_SENDER, CTRL_UA))?;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sends one application payload as a stop-and-wait I-frame,
    /// retransmitting on REJ or timeout, and returns the number of
    /// bytes accepted by the peer.
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<usize, LinkError> {
        debug_assert_eq!(self.params.role, Role::Transmitter);

        let wire = encode_information(ADDR_SENDER, self.tx_sequence_bit, payload);
        trace!(target: self.name.as_str(), "I-frame on wire: {:02x?}", wire);
        self.port.write_bytes(&wire)?;
        self.stats.frames_sent += 1;

        let mut timer = RetryTimer::new(self.params.timeout, self.params.max_retransmissions);
        timer.start();
        let mut parser = FrameParser::new(ADDR_SENDER, accept_rr_or_rej);
        let expected_rr = self.tx_sequence_bit.toggled();

        loop {
            if let Some(byte) = self.port.read_one()? {
                if let Some(RawFrame::Supervisory { ctrl, .. }) = parser.step(byte) {
                    if let Some(seq) = rr_seq(ctrl) {
                        if seq == expected_rr {
                            self.tx_sequence_bit = self.tx_sequence_bit.toggled();
                            debug!(target: self.name.as_str(), "frame accepted (RR)");
                            return Ok(payload.len());
                        }
                        // RR for a sequence number we weren't expecting: ignore.
                    } else if rej_seq(ctrl).is_some() {
                        warn!(target: self.name.as_str(), "received REJ, retransmitting");
                        match timer.consume_retry() {
                            TimerEvent::Retry => {
                                self.port.write_bytes(&wire)?;
                                self.stats.frames_retransmitted += 1;
                                parser = FrameParser::new(ADDR_SENDER, accept_rr_or_rej);
                            }
                            TimerEvent::Exhausted => {
                                return Err(LinkError::TimeoutExceeded(
                                    self.params.max_retransmissions,
                                ));
                            }
                            TimerEvent::NotExpired => unreachable!(),
                        }
                    }
                }
            }

            match timer.poll() {
                TimerEvent::NotExpired => {}
                TimerEvent::Retry => {
                    warn!(target: self.name.as_str(), "ack timed out, retransmitting");
                    self.port.write_bytes(&wire)?;
                    self.stats.frames_retransmitted += 1;
                    self.stats.timeouts += 1;
                    parser = FrameParser::new(ADDR_SENDER, accept_rr_or_rej);
                }
                TimerEvent::Exhausted => {
                    self.stats.timeouts += 1;
                    return Err(LinkError::TimeoutExceeded(self.params.max_retransmissions));
                }
            }
        }
    }

    /// Blocks until one I-frame is fully received (resynchronizing
    /// past any garbage on the way), then acknowledges it. Returns
    /// the payload length copied into `buffer`, or 0 if the frame
    /// failed its BCC2 or was a retransmitted duplicate — neither is
    /// an error; the caller should call `recv_payload` again.
    pub fn recv_payload(&mut self, buffer: &mut [u8]) -> Result<usize, LinkError> {
        debug_assert_eq!(self.params.role, Role::Receiver);

        let mut parser = FrameParser::new(ADDR_SENDER, accept_information);
        loop {
            let byte = match self.port.read_one()? {
                Some(b) => b,
                None => continue,
            };

            let (ctrl, stuffed) = match parser.step(byte) {
                Some(RawFrame::Information { ctrl, stuffed, .. }) => (ctrl, stuffed),
                _ => continue,
            };
            let seq = match i_seq(ctrl) {
                Some(s) => s,
                None => continue,
            };

            let destuffed = match frame::destuff(&stuffed) {
                Ok(d) if !d.is_empty() => d,
                _ => {
                    warn!(target: self.name.as_str(), "ill-formed I-frame, discarding");
                    self.port
                        .write_bytes(&encode_supervisory(ADDR_SENDER, ctrl_rej(seq)))?;
                    self.stats.frames_rejected += 1;
                    return Ok(0);
                }
            };
            let (payload, received_bcc2) = destuffed.split_at(destuffed.len() - 1);
            let computed_bcc2 = frame::bcc2(payload);

            if computed_bcc2 != received_bcc2[0] {
                warn!(target: self.name.as_str(), "BCC2 mismatch, sending REJ");
                self.port
                    .write_bytes(&encode_supervisory(ADDR_SENDER, ctrl_rej(seq)))?;
                self.stats.frames_rejected += 1;
                return Ok(0);
            }

            // Acknowledge regardless of duplicate status — the peer
            // must be unblocked even if we don't deliver the payload.
            self.port
                .write_bytes(&encode_supervisory(ADDR_SENDER, ctrl_rr(seq.toggled())))?;

            if seq != self.rx_expected_bit {
                warn!(target: self.name.as_str(), "duplicate I-frame, not delivering");
                return Ok(0);
            }

            self.rx_expected_bit = self.rx_expected_bit.toggled();
            let n = payload.len().min(buffer.len());
            buffer[..n].copy_from_slice(&payload[..n]);
            self.stats.bytes_transferred += n as u64;
            debug!(target: self.name.as_str(), "delivered {} byte payload", n);
            return Ok(n);
        }
    }

    /// Runs the DISC/UA teardown for this session's role and closes
    /// the device. Disconnection is best-effort on its last step: if
    /// the peer's final acknowledgement never arrives, this still
    /// closes the device once retries are exhausted.
    pub fn close(mut self, report_statistics: bool) -> TransferStats {
        let result = match self.params.role {
            Role::Transmitter => self.close_as_transmitter(),
            Role::Receiver => self.close_as_receiver(),
        };
        if let Err(e) = result {
            warn!(target: self.name.as_str(), "disconnect best-effort step failed: {}", e);
        }
        if report_statistics {
            debug!(target: self.name.as_str(), "transfer stats: {:?}", self.stats);
        }
        self.stats
        // `self` drops here, releasing the guard (if held) via `Drop`.
    }

    fn close_as_transmitter(&mut self) -> Result<(), LinkError> {
        let disc_frame = encode_supervisory(ADDR_SENDER, CTRL_DISC);
        self.port.write_bytes(&disc_frame)?;

        let mut timer = RetryTimer::new(self.params.timeout, self.params.max_retransmissions);
        timer.start();
        let mut parser = FrameParser::new(ADDR_RECEIVER, accept_disc);

        loop {
            if let Some(byte) = self.port.read_one()? {
                if let Some(RawFrame::Supervisory { ctrl, .. }) = parser.step(byte) {
                    if ctrl == CTRL_DISC {
                        self.port
                            .write_bytes(&encode_supervisory(ADDR_RECEIVER, CTRL_UA))?;
                        debug!(target: self.name.as_str(), "disconnect handshake complete");
                        return Ok(());
                    }
                }
            }
            match timer.poll() {
                TimerEvent::NotExpired => {}
                TimerEvent::Retry => self.port.write_bytes(&disc_frame)?,
                TimerEvent::Exhausted => {
                    // Best-effort: send the closing UA anyway and proceed to close.
                    self.port
                        .write_bytes(&encode_supervisory(ADDR_RECEIVER, CTRL_UA))
                        .ok();
                    return Err(LinkError::TimeoutExceeded(self.params.max_retransmissions));
                }
            }
        }
    }

    fn close_as_receiver(&mut self) -> Result<(), LinkError> {
        let mut parser = FrameParser::new(ADDR_SENDER, accept_disc);
        loop {
            if let Some(byte) = self.port.read_one()? {
                if let Some(RawFrame::Supervisory { ctrl, .. }) = parser.step(byte) {
                    if ctrl == CTRL_DISC {
                        break;
                    }
                }
            }
        }

        let disc_frame = encode_supervisory(ADDR_RECEIVER, CTRL_DISC);
        self.port.write_bytes(&disc_frame)?;

        let mut timer = RetryTimer::new(self.params.timeout, self.params.max_retransmissions);
        timer.start();
        let mut ua_parser = FrameParser::new(ADDR_RECEIVER, accept_ua);

        loop {
            if let Some(byte) = self.port.read_one()? {
                if let Some(RawFrame::Supervisory { ctrl, .. }) = ua_parser.step(byte) {
                    if ctrl == CTRL_UA {
                        debug!(target: self.name.as_str(), "disconnect handshake complete");
                        return Ok(());
                    }
                }
            }
            match timer.poll() {
                TimerEvent::NotExpired => {}
                TimerEvent::Retry => self.port.write_bytes(&disc_frame)?,
                TimerEvent::Exhausted => {
                    return Err(LinkError::TimeoutExceeded(self.params.max_retransmissions));
                }
            }
        }
    }
}

/// Releases the process-wide guard whenever a session goes out of
/// scope — on a normal `close()`, on an early `?` return through a
/// caller holding the session, or on an unwinding panic — so "destroyed
/// by close" (or by drop) always frees the next `Session::open` rather
/// than leaking the guard on anything but the happy path.
impl<S: SerialAdapter> Drop for Session<S> {
    fn drop(&mut self) {
        if self.holds_guard {
            SESSION_OPEN.store(false, Ordering::SeqCst);
        }
    }
}
