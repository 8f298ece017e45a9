//! End-to-end tests: a real loopback TCP listener stands in for the PLC, a
//! real `Listener` runs the firewall, and a plain `TcpStream` plays the
//! client, driving allowed reads, blocked writes, malformed frames, rate
//! limiting, and upstream failure over actual sockets.

use std::sync::Arc;
use std::time::Duration;

use modbus_firewall::config::FirewallConfig;
use modbus_firewall::listener::Listener;
use modbus_firewall::logger::TransactionLogger;
use modbus_firewall::proxy::ProxyContext;
use modbus_firewall::rate_limiter::RateLimiter;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::time::timeout;

/// A stub PLC that, for every request it receives, echoes back a canned
/// "read holding registers" reply carrying the request's transaction id.
async fn spawn_stub_plc() -> std::net::SocketAddr {
    let listener = TokioTcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 260];
                loop {
                    let n = match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let tid = u16::from_be_bytes([buf[0], buf[1]]);
                    let reply = vec![
                        (tid >> 8) as u8,
                        tid as u8,
                        0x00,
                        0x00,
                        0x00,
                        0x05,
                        buf[6],
                        0x03,
                        0x02,
                        0x00,
                        0x0A,
                    ];
                    let _ = n; // only the transaction id (parsed above) matters for the stub reply
                    if stream.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

async fn spawn_firewall(mut config: FirewallConfig, plc_addr: std::net::SocketAddr) -> std::net::SocketAddr {
    config.plc_host = plc_addr.ip().to_string();
    config.plc_port = plc_addr.port();
    config.listen_port = 0;

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("log.csv");
    std::mem::forget(dir); // keep the tempdir alive for the test process

    let policy = Arc::new(config.to_security_policy());
    let limiter = Arc::new(RateLimiter::new());
    let logger = Arc::new(TransactionLogger::new(&log_path, config.log_rotate_bytes, config.log_backup_count, false).unwrap());

    let listen_host = config.listen_host.clone();
    let ctx = Arc::new(ProxyContext {
        config: Arc::new(config),
        policy,
        limiter,
        logger,
    });

    let listener = Listener::bind(&listen_host, 0).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(listener.run(ctx, rx));

    addr
}

#[tokio::test]
async fn read_holding_registers_is_forwarded() {
    let plc_addr = spawn_stub_plc().await;
    let fw_addr = spawn_firewall(FirewallConfig::default(), plc_addr).await;

    let mut client = TcpStream::connect(fw_addr).await.unwrap();
    let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
    client.write_all(&request).await.unwrap();

    let mut buf = vec![0u8; 260];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf)).await.unwrap().unwrap();
    assert!(n >= 9);
    assert_eq!(buf[7], 0x03); // not an exception
}

#[tokio::test]
async fn write_single_register_is_blocked() {
    let plc_addr = spawn_stub_plc().await;
    let fw_addr = spawn_firewall(FirewallConfig::default(), plc_addr).await;

    let mut client = TcpStream::connect(fw_addr).await.unwrap();
    let request = [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x00, 0x03, 0xE7];
    client.write_all(&request).await.unwrap();

    let mut buf = vec![0u8; 260];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], &[0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x86, 0x01]);
}

#[tokio::test]
async fn invalid_protocol_id_gets_no_reply() {
    let plc_addr = spawn_stub_plc().await;
    let fw_addr = spawn_firewall(FirewallConfig::default(), plc_addr).await;

    let mut client = TcpStream::connect(fw_addr).await.unwrap();
    let request = [0x00, 0x03, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
    client.write_all(&request).await.unwrap();

    // No reply should arrive; the firewall silently drops the malformed frame
    // and keeps the connection open for the next (well-formed) request.
    let mut buf = vec![0u8; 8];
    let result = timeout(Duration::from_millis(300), client.read(&mut buf)).await;
    assert!(result.is_err(), "expected a read timeout, got {result:?}");
}

#[tokio::test]
async fn rate_limit_trips_after_threshold() {
    let mut config = FirewallConfig::default();
    config.rate_limit_rps = 5;

    let plc_addr = spawn_stub_plc().await;
    let fw_addr = spawn_firewall(config, plc_addr).await;

    let mut client = TcpStream::connect(fw_addr).await.unwrap();
    let mut allowed = 0;
    let mut blocked = 0;

    for i in 0..10u16 {
        let request = [
            (i >> 8) as u8, i as u8,
            0x00, 0x00, 0x00, 0x06,
            0x01, 0x03, 0x00, 0x00, 0x00, 0x0A,
        ];
        client.write_all(&request).await.unwrap();

        let mut buf = vec![0u8; 260];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf)).await.unwrap().unwrap();
        if buf[7] >= 0x80 {
            blocked += 1;
        } else {
            allowed += 1;
        }
    }

    assert_eq!(allowed, 5);
    assert_eq!(blocked, 5);
}

#[tokio::test]
async fn upstream_closure_terminates_session_but_listener_survives() {
    let listener = TokioTcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let plc_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = vec![0u8; 260];
            // Serve exactly one request, then drop the connection.
            let _ = stream.read(&mut buf).await;
            let tid = u16::from_be_bytes([buf[0], buf[1]]);
            let reply = vec![
                (tid >> 8) as u8, tid as u8,
                0x00, 0x00, 0x00, 0x05,
                buf[6], 0x03, 0x02, 0x00, 0x0A,
            ];
            let _ = stream.write_all(&reply).await;
        }
        // listener (and its socket) drop here; next connect attempt fails
    });

    let fw_addr = spawn_firewall(FirewallConfig::default(), plc_addr).await;

    let mut client = TcpStream::connect(fw_addr).await.unwrap();
    let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
    client.write_all(&request).await.unwrap();
    let mut buf = vec![0u8; 260];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(buf[7], 0x03);

    // Second request: no PLC left to dial into for a new connection, but the
    // listener itself must still accept new client sockets.
    let second_client = timeout(Duration::from_secs(1), TcpStream::connect(fw_addr)).await;
    assert!(second_client.is_ok(), "listener should keep accepting after a session ends");
    let _ = n;
}
