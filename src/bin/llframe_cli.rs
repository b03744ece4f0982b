//! Command-line driver for [`llframe`]: sends or receives a single
//! file over a serial link. Plain positional arguments rather than a
//! flag-based CLI, since there is exactly one way to invoke it.

use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;
use std::time::Duration;

use log::error;

use llframe::{BaudRate, LinkError, RealSerialPort, Role, Session, SessionParams};

struct Args {
    serial_port: String,
    role: Role,
    baud_rate: BaudRate,
    max_retransmissions: u32,
    timeout: Duration,
    file_name: PathBuf,
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {} <serial-port> <tx|rx> <baud-rate> <max-retransmissions> <timeout-seconds> <file>\n\
         Example: {} /dev/ttyS1 tx 9600 3 3 report.bin",
        program, program
    )
}

fn parse_args(mut argv: std::env::Args) -> Result<Args, String> {
    let program = argv.next().unwrap_or_else(|| "llframe-cli".into());
    let serial_port = argv.next().ok_or_else(|| usage(&program))?;
    let role = match argv.next().ok_or_else(|| usage(&program))?.as_str() {
        "tx" => Role::Transmitter,
        "rx" => Role::Receiver,
        other => return Err(format!("unknown role {:?}, expected tx or rx", other)),
    };
    let baud_rate = BaudRate::from_str(&argv.next().ok_or_else(|| usage(&program))?)?;
    let max_retransmissions: u32 = argv
        .next()
        .ok_or_else(|| usage(&program))?
        .parse()
        .map_err(|_| "max-retransmissions must be a non-negative integer".to_string())?;
    let timeout_seconds: u64 = argv
        .next()
        .ok_or_else(|| usage(&program))?
        .parse()
        .map_err(|_| "timeout-seconds must be a non-negative integer".to_string())?;
    let file_name = PathBuf::from(argv.next().ok_or_else(|| usage(&program))?);

    Ok(Args {
        serial_port,
        role,
        baud_rate,
        max_retransmissions,
        timeout: Duration::from_secs(timeout_seconds),
        file_name,
    })
}

fn exit_code_for(err: &LinkError) -> i32 {
    match err {
        LinkError::DeviceUnavailable(_) => 2,
        LinkError::DeviceIO(_) => 3,
        LinkError::TimeoutExceeded(_) => 4,
    }
}

fn main() {
    env_logger::init();

    let args = match parse_args(std::env::args()) {
        Ok(a) => a,
        Err(message) => {
            eprintln!("{}", message);
            exit(1);
        }
    };

    if let Err(err) = run(args) {
        error!("{}", err);
        exit(exit_code_for(&err));
    }
}

fn run(args: Args) -> Result<(), LinkError> {
    let port = RealSerialPort::open(&args.serial_port, args.baud_rate)?;
    let params = SessionParams {
        role: args.role,
        serial_port_name: args.serial_port.clone(),
        baud_rate: args.baud_rate,
        timeout: args.timeout,
        max_retransmissions: args.max_retransmissions,
    };

    let mut session = Session::open(port, params)?;

    let result = match args.role {
        Role::Transmitter => llframe::app::run_transmitter(&mut session, &args.file_name),
        Role::Receiver => llframe::app::run_receiver(&mut session, &args.file_name),
    };

    let stats = session.close(true);
    println!(
        "frames sent: {}, retransmitted: {}, rejected: {}, timeouts: {}, bytes transferred: {}",
        stats.frames_sent,
        stats.frames_retransmitted,
        stats.frames_rejected,
        stats.timeouts,
        stats.bytes_transferred,
    );

    result
}
