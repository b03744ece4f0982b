//! A stop-and-wait, byte-stuffed link-layer protocol for transferring
//! files over a serial line, plus the application framer built on top
//! of it.
//!
//! Each layer gets its own module, with [`session::Session`] as the
//! single type application code actually holds onto.
//!
//! ```text
//! app.rs      file chunking, start/data/end control packets
//! session.rs  SET/UA/DISC handshakes, stop-and-wait I-frame exchange
//! recv.rs     byte-at-a-time frame recognizer
//! frame.rs    byte stuffing, BCC1/BCC2, envelope encoding
//! timer.rs    retransmission deadline tracking
//! serial.rs   the hardware boundary trait and its real implementation
//! error.rs    the error type visible at the crate boundary
//! ```

pub mod app;
pub mod error;
pub mod frame;
pub mod recv;
pub mod serial;
pub mod session;
pub mod timer;

pub use error::LinkError;
pub use serial::{BaudRate, RealSerialPort, SerialAdapter};
pub use session::{Role, Session, SessionParams, TransferStats};
