//! Simulated PLC: a minimal Modbus/TCP server with coils, discrete inputs,
//! holding registers and input registers, for exercising the firewall
//! against a real downstream device during manual testing.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[clap(about = "Simulated Modbus/TCP PLC for firewall testing")]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    #[clap(long, default_value_t = 5020)]
    port: u16,
}

struct SimulatedPlc {
    coils: RwLock<HashMap<u16, bool>>,
    discrete_inputs: RwLock<HashMap<u16, bool>>,
    holding_registers: RwLock<HashMap<u16, u16>>,
    input_registers: RwLock<HashMap<u16, u16>>,
}

impl SimulatedPlc {
    fn new() -> Self {
        let mut holding = HashMap::new();
        let mut input = HashMap::new();
        let mut coils = HashMap::new();
        let mut discrete = HashMap::new();

        // A handful of plausible process values: setpoints, sensor readings.
        for (addr, value) in [(0u16, 300u16), (1, 1000), (2, 600), (3, 800), (4, 100)] {
            holding.insert(addr, value);
        }
        for (addr, value) in [(0u16, 250u16), (1, 1013), (2, 500), (3, 750)] {
            input.insert(addr, value);
        }
        coils.insert(0, true); // Pump 1 ON
        coils.insert(2, true); // Valve 1 OPEN
        discrete.insert(0, true); // High level sensor
        discrete.insert(5, true); // E-stop OK

        Self {
            coils: RwLock::new(coils),
            discrete_inputs: RwLock::new(discrete),
            holding_registers: RwLock::new(holding),
            input_registers: RwLock::new(input),
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        let mut buffer = vec![0u8; 260];
        loop {
            let n = match stream.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("read error: {e}");
                    break;
                }
            };
            if n < 8 {
                continue;
            }

            let tid = u16::from_be_bytes([buffer[0], buffer[1]]);
            let protocol_id = u16::from_be_bytes([buffer[2], buffer[3]]);
            let uid = buffer[6];
            let fc = buffer[7];
            if protocol_id != 0 {
                continue;
            }

            let response = self.dispatch(tid, uid, fc, &buffer[8..n]).await;
            if let Err(e) = stream.write_all(&response).await {
                debug!("write error: {e}");
                break;
            }
        }
    }

    async fn dispatch(&self, tid: u16, uid: u8, fc: u8, data: &[u8]) -> Vec<u8> {
        match fc {
            0x01 if data.len() >= 4 => {
                let start = u16::from_be_bytes([data[0], data[1]]);
                let count = u16::from_be_bytes([data[2], data[3]]);
                self.read_bits(tid, uid, fc, &self.coils, start, count).await
            }
            0x02 if data.len() >= 4 => {
                let start = u16::from_be_bytes([data[0], data[1]]);
                let count = u16::from_be_bytes([data[2], data[3]]);
                self.read_bits(tid, uid, fc, &self.discrete_inputs, start, count)
                    .await
            }
            0x03 if data.len() >= 4 => {
                let start = u16::from_be_bytes([data[0], data[1]]);
                let count = u16::from_be_bytes([data[2], data[3]]);
                self.read_registers(tid, uid, fc, &self.holding_registers, start, count)
                    .await
            }
            0x04 if data.len() >= 4 => {
                let start = u16::from_be_bytes([data[0], data[1]]);
                let count = u16::from_be_bytes([data[2], data[3]]);
                self.read_registers(tid, uid, fc, &self.input_registers, start, count)
                    .await
            }
            0x05 if data.len() >= 4 => {
                let addr = u16::from_be_bytes([data[0], data[1]]);
                let on = data[2] == 0xFF;
                self.coils.write().await.insert(addr, on);
                echo_response(tid, uid, fc, data)
            }
            0x06 if data.len() >= 4 => {
                let addr = u16::from_be_bytes([data[0], data[1]]);
                let value = u16::from_be_bytes([data[2], data[3]]);
                self.holding_registers.write().await.insert(addr, value);
                echo_response(tid, uid, fc, data)
            }
            _ => build_exception(tid, uid, fc, 0x01),
        }
    }

    async fn read_bits(
        &self,
        tid: u16,
        uid: u8,
        fc: u8,
        bank: &RwLock<HashMap<u16, bool>>,
        start: u16,
        count: u16,
    ) -> Vec<u8> {
        let bank = bank.read().await;
        let byte_count = (count as usize).div_ceil(8);
        let mut bytes = vec![0u8; byte_count];
        for i in 0..count {
            if bank.get(&(start + i)).copied().unwrap_or(false) {
                bytes[(i / 8) as usize] |= 1 << (i % 8);
            }
        }
        let mut response = Vec::with_capacity(9 + byte_count);
        response.extend_from_slice(&tid.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x00]);
        response.extend_from_slice(&((2 + byte_count) as u16).to_be_bytes());
        response.push(uid);
        response.push(fc);
        response.push(byte_count as u8);
        response.extend_from_slice(&bytes);
        response
    }

    async fn read_registers(
        &self,
        tid: u16,
        uid: u8,
        fc: u8,
        bank: &RwLock<HashMap<u16, u16>>,
        start: u16,
        count: u16,
    ) -> Vec<u8> {
        let bank = bank.read().await;
        let mut response = Vec::with_capacity(9 + 2 * count as usize);
        response.extend_from_slice(&tid.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x00]);
        response.extend_from_slice(&(3 + 2 * count).to_be_bytes());
        response.push(uid);
        response.push(fc);
        response.push((2 * count) as u8);
        for i in 0..count {
            let value = bank.get(&(start + i)).copied().unwrap_or(0);
            response.extend_from_slice(&value.to_be_bytes());
        }
        response
    }
}

fn echo_response(tid: u16, uid: u8, fc: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(8 + data.len());
    response.extend_from_slice(&tid.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&((2 + data.len()) as u16).to_be_bytes());
    response.push(uid);
    response.push(fc);
    response.extend_from_slice(data);
    response
}

fn build_exception(tid: u16, uid: u8, fc: u8, exception: u8) -> Vec<u8> {
    vec![
        (tid >> 8) as u8,
        tid as u8,
        0x00,
        0x00,
        0x00,
        0x03,
        uid,
        fc | 0x80,
        exception,
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(addr = %listener.local_addr()?, "simulated PLC listening");

    let plc = Arc::new(SimulatedPlc::new());
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "PLC accepted connection");
                let plc = Arc::clone(&plc);
                tokio::spawn(async move { plc.handle_connection(stream).await });
            }
            Err(e) => {
                error!(error = %e, "accept error");
            }
        }
    }
}
