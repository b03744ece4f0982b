//! Serial port adapter.
//!
//! The hardware boundary sits behind a small trait, implemented once
//! for a real device and once per test double. [`SerialAdapter`] is
//! the trait `Session` is generic over, [`RealSerialPort`] is the one
//! production implementation, backed by the `serialport` crate (the
//! blocking sibling of the async `tokio_serial` crate, which this
//! single-threaded poll loop has no use for).

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::LinkError;

/// The non-blocking byte read/write contract `Session` drives the
/// protocol through. `read_one` must return promptly with `Ok(None)`
/// rather than block when no byte is available, so the caller can
/// keep polling its retry timer (see `timer.rs`).
pub trait SerialAdapter {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
    fn read_one(&mut self) -> Result<Option<u8>, LinkError>;

    /// Whether opening this adapter is subject to the process-wide
    /// "at most one session open" guard. A real device is exclusively
    /// owned for its session's lifetime, so `RealSerialPort` keeps the
    /// default of `true`. An in-process test double that exercises
    /// both ends of a link within a single test process — where a
    /// transmitter and a receiver session are legitimately open at
    /// once — overrides this to `false`.
    fn enforces_single_session() -> bool
    where
        Self: Sized,
    {
        true
    }
}

/// Standard POSIX baud rates; closed set so an invalid rate is a
/// construction-time error rather than a silently-ignored `termios`
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    B1200,
    B1800,
    B2400,
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl From<BaudRate> for u32 {
    fn from(b: BaudRate) -> u32 {
        match b {
            BaudRate::B1200 => 1200,
            BaudRate::B1800 => 1800,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

impl std::str::FromStr for BaudRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1200" => Ok(BaudRate::B1200),
            "1800" => Ok(BaudRate::B1800),
            "2400" => Ok(BaudRate::B2400),
            "4800" => Ok(BaudRate::B4800),
            "9600" => Ok(BaudRate::B9600),
            "19200" => Ok(BaudRate::B19200),
            "38400" => Ok(BaudRate::B38400),
            "57600" => Ok(BaudRate::B57600),
            "115200" => Ok(BaudRate::B115200),
            other => Err(format!("unsupported baud rate: {}", other)),
        }
    }
}

/// How long a single `read()` may block with no byte ready before
/// returning control to the poll loop. Short enough that the retry
/// timer's deadline is never overshot by more than this.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A real serial device, opened raw / 8N1 / no flow control with
/// both queues cleared.
pub struct RealSerialPort {
    port: Box<dyn serialport::SerialPort>,
}

impl RealSerialPort {
    pub fn open(port_name: &str, baud: BaudRate) -> Result<Self, LinkError> {
        let port = serialport::new(port_name, u32::from(baud))
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_POLL_INTERVAL)
            .open()
            .map_err(|e| LinkError::DeviceUnavailable(e.to_string()))?;

        port.clear(serialport::ClearBuffer::All)
            .map_err(|e| LinkError::DeviceUnavailable(e.to_string()))?;

        Ok(RealSerialPort { port })
    }
}

impl SerialAdapter for RealSerialPort {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.port
            .write_all(bytes)
            .map_err(|e| LinkError::DeviceIO(e.to_string()))
    }

    fn read_one(&mut self) -> Result<Option<u8>, LinkError> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(LinkError::DeviceIO(e.to_string())),
        }
    }
}
