//! Accept loop: binds the listen socket and spawns one proxy task per
//! accepted connection. Each spawned task is fully independent; a panic or
//! slow peer in one connection never blocks accept() for the others.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::proxy::{self, ProxyContext};

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let inner = TcpListener::bind((host, port)).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves. Already-spawned
    /// connection tasks are not aborted; they drain naturally as their
    /// peers disconnect or their sockets error out.
    pub async fn run(self, ctx: Arc<ProxyContext>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.inner.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let ctx = Arc::clone(&ctx);
                            tokio::spawn(async move {
                                proxy::handle_connection(stream, peer, ctx).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received, no longer accepting new connections");
                    break;
                }
            }
        }
    }
}
