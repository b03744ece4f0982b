//! End-to-end file transfer over a loopback session pair, exercising
//! `app::run_transmitter`/`app::run_receiver` together rather than
//! the link layer in isolation.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use llframe::app::{run_receiver, run_transmitter};
use llframe::error::LinkError;
use llframe::serial::SerialAdapter;
use llframe::session::{Role, Session, SessionParams};

/// Opts out of the process-wide "one session at a time" guard: each
/// test here legitimately holds a transmitter and a receiver session
/// open in the same process at once.
#[derive(Clone)]
struct LoopbackPort {
    outbox: Arc<Mutex<VecDeque<u8>>>,
    inbox: Arc<Mutex<VecDeque<u8>>>,
}

fn loopback_pair() -> (LoopbackPort, LoopbackPort) {
    let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
    let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
    let a = LoopbackPort { outbox: a_to_b.clone(), inbox: b_to_a.clone() };
    let b = LoopbackPort { outbox: b_to_a, inbox: a_to_b };
    (a, b)
}

impl SerialAdapter for LoopbackPort {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.outbox.lock().unwrap().extend(bytes.iter().copied());
        Ok(())
    }

    fn read_one(&mut self) -> Result<Option<u8>, LinkError> {
        Ok(self.inbox.lock().unwrap().pop_front())
    }

    fn enforces_single_session() -> bool {
        false
    }
}

fn params(role: Role) -> SessionParams {
    SessionParams {
        role,
        serial_port_name: "loopback".into(),
        baud_rate: llframe::BaudRate::B9600,
        timeout: Duration::from_millis(200),
        max_retransmissions: 3,
    }
}

fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("llframe-app-test-{}-{}", std::process::id(), name));
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents).unwrap();
    path
}

#[test]
fn transfers_a_multi_chunk_file_intact() {
    let (tx_port, rx_port) = loopback_pair();

    // Larger than one CHUNK_SIZE so the transfer spans several data packets.
    let payload: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();
    let input_path = temp_file("input.bin", &payload);
    let output_path = {
        let mut p = std::env::temp_dir();
        p.push(format!("llframe-app-test-{}-output.bin", std::process::id()));
        p
    };

    let input_path_for_thread = input_path.clone();
    let tx_thread = std::thread::spawn(move || {
        let mut session = Session::open(tx_port, params(Role::Transmitter)).unwrap();
        run_transmitter(&mut session, &input_path_for_thread).unwrap();
        session.close(true)
    });

    let mut rx_session = Session::open(rx_port, params(Role::Receiver)).unwrap();
    run_receiver(&mut rx_session, &output_path).unwrap();
    rx_session.close(true);
    tx_thread.join().unwrap();

    let received = std::fs::read(&output_path).unwrap();
    assert_eq!(received, payload);

    std::fs::remove_file(&input_path).ok();
    std::fs::remove_file(&output_path).ok();
}

#[test]
fn empty_file_transfers_as_start_then_end() {
    let (tx_port, rx_port) = loopback_pair();

    let input_path = temp_file("empty-input.bin", &[]);
    let output_path = {
        let mut p = std::env::temp_dir();
        p.push(format!("llframe-app-test-{}-empty-output.bin", std::process::id()));
        p
    };

    let input_path_for_thread = input_path.clone();
    let tx_thread = std::thread::spawn(move || {
        let mut session = Session::open(tx_port, params(Role::Transmitter)).unwrap();
        run_transmitter(&mut session, &input_path_for_thread).unwrap();
        session.close(true)
    });

    let mut rx_session = Session::open(rx_port, params(Role::Receiver)).unwrap();
    run_receiver(&mut rx_session, &output_path).unwrap();
    rx_session.close(true);
    tx_thread.join().unwrap();

    let received = std::fs::read(&output_path).unwrap();
    assert!(received.is_empty());

    std::fs::remove_file(&input_path).ok();
    std::fs::remove_file(&output_path).ok();
}
