//! Application framer and file-transfer orchestration.
//!
//! `run_transmitter`/`run_receiver` are split into two functions
//! instead of one role-switched entry point, since `Session<S>`
//! already encodes the role in its handshake.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::error::LinkError;
use crate::serial::SerialAdapter;
use crate::session::Session;

/// Maximum payload carried in one data packet.
pub const CHUNK_SIZE: usize = 1000;

const CTRL_START: u8 = 1;
const CTRL_DATA: u8 = 2;
const CTRL_END: u8 = 3;

const TLV_FILE_SIZE: u8 = 0;
const TLV_FILE_NAME: u8 = 1;

/// A parsed start/end control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub is_end: bool,
    pub file_size: u64,
    pub file_name: String,
}

fn build_control_packet(is_end: bool, file_size: u64, file_name: &str) -> Vec<u8> {
    let size_bytes = file_size.to_le_bytes();
    let name_bytes = file_name.as_bytes();

    let mut packet = Vec::with_capacity(5 + size_bytes.len() + name_bytes.len());
    packet.push(if is_end { CTRL_END } else { CTRL_START });
    packet.push(TLV_FILE_SIZE);
    packet.push(size_bytes.len() as u8);
    packet.extend_from_slice(&size_bytes);
    packet.push(TLV_FILE_NAME);
    packet.push(name_bytes.len() as u8);
    packet.extend_from_slice(name_bytes);
    packet
}

fn parse_control_packet(packet: &[u8]) -> Option<ControlPacket> {
    if packet.len() < 3 {
        return None;
    }
    let is_end = match packet[0] {
        CTRL_START => false,
        CTRL_END => true,
        _ => return None,
    };
    if packet[1] != TLV_FILE_SIZE {
        return None;
    }
    let l1 = packet[2] as usize;
    if packet.len() < 3 + l1 + 2 {
        return None;
    }
    let mut size_buf = [0u8; 8];
    let copy_len = l1.min(8);
    size_buf[..copy_len].copy_from_slice(&packet[3..3 + copy_len]);
    let file_size = u64::from_le_bytes(size_buf);

    let name_tag_offset = 3 + l1;
    if packet[name_tag_offset] != TLV_FILE_NAME {
        return None;
    }
    let l2 = packet[name_tag_offset + 1] as usize;
    let name_offset = name_tag_offset + 2;
    if packet.len() < name_offset + l2 {
        return None;
    }
    let file_name = String::from_utf8(packet[name_offset..name_offset + l2].to_vec()).ok()?;

    Some(ControlPacket { is_end, file_size, file_name })
}

fn build_data_packet(sequence_number: u8, data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + data.len());
    packet.push(CTRL_DATA);
    packet.push(sequence_number);
    packet.push((data.len() >> 8) as u8);
    packet.push((data.len() & 0xFF) as u8);
    packet.extend_from_slice(data);
    packet
}

fn parse_data_packet(packet: &[u8]) -> Option<(u8, &[u8])> {
    if packet.len() < 4 || packet[0] != CTRL_DATA {
        return None;
    }
    let sequence_number = packet[1];
    let len = ((packet[2] as usize) << 8) | (packet[3] as usize);
    if packet.len() < 4 + len {
        return None;
    }
    Some((sequence_number, &packet[4..4 + len]))
}

/// Sends `file_path` over an already-open transmitter session,
/// chunking it into `CHUNK_SIZE`-byte data packets between a start
/// and an end control packet.
pub fn run_transmitter<S: SerialAdapter>(
    session: &mut Session<S>,
    file_path: &Path,
) -> Result<(), LinkError> {
    let mut file = File::open(file_path)
        .map_err(|e| LinkError::DeviceUnavailable(format!("cannot open {:?}: {}", file_path, e)))?;
    let file_size = file
        .metadata()
        .map_err(|e| LinkError::DeviceIO(e.to_string()))?
        .len();
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("transfer.bin")
        .to_string();

    info!("sending {} ({} bytes)", file_name, file_size);
    session.send_payload(&build_control_packet(false, file_size, &file_name))?;

    let mut buffer = [0u8; CHUNK_SIZE];
    let mut sequence_number: u8 = 0;
    loop {
        let n = file.read(&mut buffer).map_err(|e| LinkError::DeviceIO(e.to_string()))?;
        if n == 0 {
            break;
        }
        session.send_payload(&build_data_packet(sequence_number, &buffer[..n]))?;
        debug!("sent data packet seq={} len={}", sequence_number, n);
        sequence_number = sequence_number.wrapping_add(1);
    }

    session.send_payload(&build_control_packet(true, file_size, &file_name))?;
    info!("transfer complete");
    Ok(())
}

/// Receives a file over an already-open receiver session into
/// `out_path`, validating that the end packet's size/name agree
/// with the start packet's.
pub fn run_receiver<S: SerialAdapter>(
    session: &mut Session<S>,
    out_path: &Path,
) -> Result<(), LinkError> {
    let start = loop {
        let mut buf = [0u8; CHUNK_SIZE + 16];
        let n = session.recv_payload(&mut buf)?;
        if n == 0 {
            continue;
        }
        match parse_control_packet(&buf[..n]) {
            Some(packet) if !packet.is_end => break packet,
            _ => warn!("expected start control packet, ignoring unexpected payload"),
        }
    };
    info!("receiving {} ({} bytes)", start.file_name, start.file_size);

    let mut out = File::create(out_path)
        .map_err(|e| LinkError::DeviceUnavailable(format!("cannot create {:?}: {}", out_path, e)))?;

    let mut bytes_written: u64 = 0;
    loop {
        let mut buf = [0u8; CHUNK_SIZE + 16];
        let n = session.recv_payload(&mut buf)?;
        if n == 0 {
            continue;
        }
        let packet = &buf[..n];

        if let Some(end) = parse_control_packet(packet) {
            if !end.is_end {
                warn!("received a second start packet mid-transfer, ignoring");
                continue;
            }
            if end.file_size != start.file_size || end.file_name != start.file_name {
                return Err(LinkError::DeviceIO(
                    "end control packet does not match start control packet".into(),
                ));
            }
            break;
        }

        if let Some((sequence_number, data)) = parse_data_packet(packet) {
            out.write_all(data).map_err(|e| LinkError::DeviceIO(e.to_string()))?;
            bytes_written += data.len() as u64;
            debug!("wrote data packet seq={} len={}", sequence_number, data.len());
        }
    }

    info!("transfer complete: {} bytes written", bytes_written);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_packet_round_trips() {
        let packet = build_control_packet(false, 1234, "report.bin");
        let parsed = parse_control_packet(&packet).unwrap();
        assert!(!parsed.is_end);
        assert_eq!(parsed.file_size, 1234);
        assert_eq!(parsed.file_name, "report.bin");
    }

    #[test]
    fn end_packet_is_flagged() {
        let packet = build_control_packet(true, 1234, "report.bin");
        let parsed = parse_control_packet(&packet).unwrap();
        assert!(parsed.is_end);
    }

    #[test]
    fn data_packet_round_trips() {
        let data = [1u8, 2, 3, 4, 5];
        let packet = build_data_packet(7, &data);
        let (seq, payload) = parse_data_packet(&packet).unwrap();
        assert_eq!(seq, 7);
        assert_eq!(payload, &data);
    }

    #[test]
    fn data_packet_length_field_is_big_endian_16_bit() {
        let data = vec![0u8; 300];
        let packet = build_data_packet(0, &data);
        assert_eq!(packet[2], 1); // 300 >> 8
        assert_eq!(packet[3], 44); // 300 & 0xFF
    }
}
