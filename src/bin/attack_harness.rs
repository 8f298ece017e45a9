//! Security test harness: fires a battery of requests at a running firewall
//! instance and reports pass/fail for each expected outcome. Not part of the
//! firewall itself — a black-box client used to validate a deployment.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;

#[derive(Parser, Debug)]
#[clap(about = "Black-box security test harness for a running modbus-firewall instance")]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    #[clap(long, default_value_t = 502)]
    port: u16,
    /// Number of requests to send in the flood test
    #[clap(long, default_value_t = 50)]
    flood_count: u32,
}

struct TestResult {
    name: &'static str,
    passed: bool,
    details: String,
}

fn build_request(transaction_id: u16, unit_id: u8, function_code: u8, data: &[u8]) -> Vec<u8> {
    let mut pdu = vec![function_code];
    pdu.extend_from_slice(data);
    let length = (pdu.len() + 1) as u16;

    let mut request = Vec::with_capacity(6 + pdu.len() + 1);
    request.extend_from_slice(&transaction_id.to_be_bytes());
    request.extend_from_slice(&[0x00, 0x00]);
    request.extend_from_slice(&length.to_be_bytes());
    request.push(unit_id);
    request.extend_from_slice(&pdu);
    request
}

fn send(host: &str, port: u16, request: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    stream.write_all(request)?;
    let mut buf = vec![0u8; 260];
    let n = stream.read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

fn is_exception(response: &[u8]) -> bool {
    response.len() >= 8 && response[7] >= 0x80
}

fn test_read_holding_registers(host: &str, port: u16) -> TestResult {
    let request = build_request(1, 1, 0x03, &[0x00, 0x00, 0x00, 0x0A]);
    match send(host, port, &request) {
        Ok(response) if !is_exception(&response) => TestResult {
            name: "read holding registers allowed",
            passed: true,
            details: format!("{} byte reply", response.len()),
        },
        Ok(response) => TestResult {
            name: "read holding registers allowed",
            passed: false,
            details: format!("expected normal reply, got exception byte 0x{:02X}", response[8]),
        },
        Err(e) => TestResult {
            name: "read holding registers allowed",
            passed: false,
            details: e.to_string(),
        },
    }
}

fn test_write_single_register_blocked(host: &str, port: u16) -> TestResult {
    let request = build_request(2, 1, 0x06, &[0x00, 0x00, 0x03, 0xE7]);
    match send(host, port, &request) {
        Ok(response) if is_exception(&response) => TestResult {
            name: "write single register blocked",
            passed: true,
            details: "firewall returned exception".to_string(),
        },
        Ok(_) => TestResult {
            name: "write single register blocked",
            passed: false,
            details: "write was not blocked".to_string(),
        },
        Err(e) => TestResult {
            name: "write single register blocked",
            passed: false,
            details: e.to_string(),
        },
    }
}

fn test_malformed_protocol_id(host: &str, port: u16) -> TestResult {
    let mut request = build_request(3, 1, 0x03, &[0x00, 0x00, 0x00, 0x0A]);
    request[2] = 0x00;
    request[3] = 0x01; // non-zero protocol id

    match send(host, port, &request) {
        Ok(response) if response.is_empty() => TestResult {
            name: "malformed protocol id rejected",
            passed: true,
            details: "connection closed with no reply, as expected".to_string(),
        },
        Ok(_) => TestResult {
            name: "malformed protocol id rejected",
            passed: false,
            details: "firewall replied to a non-Modbus protocol id".to_string(),
        },
        Err(_) => TestResult {
            name: "malformed protocol id rejected",
            passed: true,
            details: "connection dropped, as expected".to_string(),
        },
    }
}

fn test_flood_attack(host: &str, port: u16, count: u32) -> TestResult {
    let mut blocked = 0u32;
    let mut allowed = 0u32;
    for i in 0..count {
        let request = build_request(i as u16, 1, 0x06, &[0x00, 0x00, 0x00, (i % 256) as u8]);
        match send(host, port, &request) {
            Ok(response) if is_exception(&response) => blocked += 1,
            Ok(_) => allowed += 1,
            Err(_) => {}
        }
    }
    TestResult {
        name: "flood of write attempts is fully blocked",
        passed: allowed == 0,
        details: format!("{blocked} blocked / {allowed} allowed of {count} sent"),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    println!(
        "{}",
        format!("Running attack harness against {}:{}", args.host, args.port).bold()
    );

    let results = vec![
        test_read_holding_registers(&args.host, args.port),
        test_write_single_register_blocked(&args.host, args.port),
        test_malformed_protocol_id(&args.host, args.port),
        test_flood_attack(&args.host, args.port, args.flood_count),
    ];

    let mut failed = 0;
    for result in &results {
        if result.passed {
            println!("{} {} -- {}", "PASS".green().bold(), result.name, result.details);
        } else {
            failed += 1;
            println!("{} {} -- {}", "FAIL".red().bold(), result.name, result.details);
        }
    }

    println!(
        "\n{}/{} tests passed",
        results.len() - failed,
        results.len()
    );
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
