//! Minimal operator HMI client: sends one Modbus/TCP request through the
//! firewall and prints the result, for manual poking at a running instance.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser, Debug)]
#[clap(about = "Interactive Modbus/TCP client for exercising a firewall instance")]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    #[clap(long, default_value_t = 502)]
    port: u16,
    #[clap(long, default_value_t = 1)]
    unit_id: u8,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read holding registers (FC 0x03)
    ReadHolding { address: u16, count: u16 },
    /// Read input registers (FC 0x04)
    ReadInput { address: u16, count: u16 },
    /// Read coils (FC 0x01)
    ReadCoils { address: u16, count: u16 },
    /// Write a single holding register (FC 0x06)
    WriteRegister { address: u16, value: u16 },
    /// Write a single coil (FC 0x05)
    WriteCoil { address: u16, on: bool },
}

fn build_request(unit_id: u8, function_code: u8, data: &[u8]) -> Vec<u8> {
    let mut pdu = vec![function_code];
    pdu.extend_from_slice(data);
    let length = (pdu.len() + 1) as u16;

    let mut request = Vec::with_capacity(6 + pdu.len() + 1);
    request.extend_from_slice(&1u16.to_be_bytes()); // transaction id
    request.extend_from_slice(&[0x00, 0x00]);
    request.extend_from_slice(&length.to_be_bytes());
    request.push(unit_id);
    request.extend_from_slice(&pdu);
    request
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (function_code, data) = match args.command {
        Command::ReadHolding { address, count } => (
            0x03,
            [address.to_be_bytes(), count.to_be_bytes()].concat(),
        ),
        Command::ReadInput { address, count } => (
            0x04,
            [address.to_be_bytes(), count.to_be_bytes()].concat(),
        ),
        Command::ReadCoils { address, count } => (
            0x01,
            [address.to_be_bytes(), count.to_be_bytes()].concat(),
        ),
        Command::WriteRegister { address, value } => (
            0x06,
            [address.to_be_bytes(), value.to_be_bytes()].concat(),
        ),
        Command::WriteCoil { address, on } => (
            0x05,
            [address.to_be_bytes(), [if on { 0xFF } else { 0x00 }, 0x00]].concat(),
        ),
    };

    let request = build_request(args.unit_id, function_code, &data);

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(&request)?;

    let mut buf = vec![0u8; 260];
    let n = stream.read(&mut buf)?;
    buf.truncate(n);

    if buf.len() >= 8 && buf[7] >= 0x80 {
        println!(
            "{} exception code 0x{:02X}",
            "BLOCKED".red().bold(),
            buf.get(8).copied().unwrap_or(0)
        );
    } else {
        println!("{} {} byte reply: {}", "OK".green().bold(), buf.len(), hex::encode(&buf));
    }

    Ok(())
}
