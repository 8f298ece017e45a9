//! The central per-connection state machine: `Accepting -> Upstream-Dialing
//! -> Relaying -> Closing`. One task drives exactly one client<->PLC session
//! pair; no proxy instance is ever touched by two threads simultaneously.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::FirewallConfig;
use crate::dpi;
use crate::frame::{ModbusFrame, ILLEGAL_FUNCTION, MAX_ADU_LEN};
use crate::logger::{LogAction, LogRecord, TransactionLogger};
use crate::policy::{self, SecurityPolicy};
use crate::rate_limiter::RateLimiter;
use crate::stats::ConnectionStats;

pub struct ProxyContext {
    pub config: Arc<FirewallConfig>,
    pub policy: Arc<SecurityPolicy>,
    pub limiter: Arc<RateLimiter>,
    pub logger: Arc<TransactionLogger>,
}

/// Drive one accepted client connection end to end. Both sockets are closed
/// unconditionally on every exit path.
pub async fn handle_connection(mut client: TcpStream, peer: SocketAddr, ctx: Arc<ProxyContext>) {
    let mut stats = ConnectionStats::new(peer);
    info!(peer = %peer, "client connected");

    let connect_timeout = Duration::from_secs(ctx.config.connection_timeout_s);
    let mut upstream = match timeout(
        connect_timeout,
        TcpStream::connect((ctx.config.plc_host.as_str(), ctx.config.plc_port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!(peer = %peer, error = %e, "failed to connect to upstream PLC");
            let _ = client.shutdown().await;
            return;
        }
        Err(_) => {
            error!(
                peer = %peer,
                timeout_s = ctx.config.connection_timeout_s,
                "timed out connecting to upstream PLC"
            );
            let _ = client.shutdown().await;
            return;
        }
    };
    debug!(peer = %peer, plc = %ctx.config.plc_host, "connected to upstream PLC");

    let idle_timeout = Duration::from_secs(ctx.config.client_idle_timeout_s);
    let upstream_timeout = Duration::from_secs(ctx.config.upstream_read_timeout_s);
    let mut buf = vec![0u8; MAX_ADU_LEN];

    'relay: loop {
        let n = match timeout(idle_timeout, client.read(&mut buf)).await {
            Ok(Ok(0)) => break, // client closed
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                error!(peer = %peer, error = %e, "client read error");
                break;
            }
            Err(_) => continue, // idle timeout is recoverable; keep waiting
        };

        let data = &buf[..n];
        let frame = match ModbusFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                stats.record_error();
                ctx.logger.log(&LogRecord {
                    transaction_id: 0,
                    source_ip: peer.ip().to_string(),
                    source_port: peer.port(),
                    function_code: 0,
                    function_name: "Unknown",
                    action: LogAction::Error,
                    reason: e.to_string(),
                    unit_id: 0,
                    data_length: 0,
                });
                continue;
            }
        };

        if let Err(e) = dpi::validate(&frame) {
            stats.record_error();
            ctx.logger.log(&LogRecord {
                transaction_id: frame.transaction_id,
                source_ip: peer.ip().to_string(),
                source_port: peer.port(),
                function_code: frame.function_code,
                function_name: crate::frame::function_name(frame.function_code),
                action: LogAction::Error,
                reason: e.to_string(),
                unit_id: frame.unit_id,
                data_length: frame.data.len(),
            });
            continue;
        }

        let source_ip = peer.ip().to_string();
        let decision = policy::evaluate(frame.function_code, &source_ip, &ctx.policy, &ctx.limiter);

        if decision.allowed {
            stats.record_allowed();
            ctx.logger.log(&LogRecord {
                transaction_id: frame.transaction_id,
                source_ip: source_ip.clone(),
                source_port: peer.port(),
                function_code: frame.function_code,
                function_name: crate::frame::function_name(frame.function_code),
                action: LogAction::Allow,
                reason: decision.reason,
                unit_id: frame.unit_id,
                data_length: frame.data.len(),
            });

            if let Err(e) = upstream.write_all(&frame.raw).await {
                error!(peer = %peer, error = %e, "failed to forward request to upstream");
                break 'relay;
            }

            let mut reply_buf = vec![0u8; MAX_ADU_LEN];
            match timeout(upstream_timeout, upstream.read(&mut reply_buf)).await {
                Ok(Ok(0)) => {
                    error!(peer = %peer, "upstream closed connection");
                    break 'relay;
                }
                Ok(Ok(m)) => {
                    if let Err(e) = client.write_all(&reply_buf[..m]).await {
                        error!(peer = %peer, error = %e, "failed to relay reply to client");
                        break 'relay;
                    }
                }
                Ok(Err(e)) => {
                    error!(peer = %peer, error = %e, "upstream read error");
                    break 'relay;
                }
                Err(_) => {
                    warn!(
                        peer = %peer,
                        transaction_id = frame.transaction_id,
                        "timed out waiting for upstream reply"
                    );
                }
            }
        } else {
            stats.record_blocked();
            ctx.logger.log(&LogRecord {
                transaction_id: frame.transaction_id,
                source_ip: source_ip.clone(),
                source_port: peer.port(),
                function_code: frame.function_code,
                function_name: crate::frame::function_name(frame.function_code),
                action: LogAction::Block,
                reason: decision.reason,
                unit_id: frame.unit_id,
                data_length: frame.data.len(),
            });

            let reply = frame.build_exception(ILLEGAL_FUNCTION);
            if let Err(e) = client.write_all(&reply).await {
                error!(peer = %peer, error = %e, "failed to write exception reply");
                break 'relay;
            }
        }
    }

    let _ = upstream.shutdown().await;
    let _ = client.shutdown().await;
    info!(
        peer = %peer,
        total = stats.total,
        allowed = stats.allowed,
        blocked = stats.blocked,
        errors = stats.errors,
        "client disconnected"
    );
}
