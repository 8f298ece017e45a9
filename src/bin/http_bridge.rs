//! HTTP-to-Modbus bridge: exposes a firewall's Modbus/TCP port over a small
//! JSON/HTTP API, for remote clients that cannot open a raw TCP socket
//! (e.g. behind an HTTP-only tunnel).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(about = "HTTP bridge in front of a modbus-firewall Modbus/TCP listener")]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    modbus_host: String,
    #[clap(long, default_value_t = 502)]
    modbus_port: u16,
    #[clap(long, default_value_t = 8080)]
    http_port: u16,
}

struct AppState {
    modbus_host: String,
    modbus_port: u16,
}

#[derive(Deserialize)]
struct ModbusRequest {
    data: String,
}

#[derive(Serialize)]
struct ModbusResponse {
    data: String,
    length: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "modbus_target": format!("{}:{}", state.modbus_host, state.modbus_port),
    }))
}

async fn handle_modbus(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModbusRequest>,
) -> impl IntoResponse {
    let frame = match BASE64.decode(&request.data) {
        Ok(frame) => frame,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: format!("invalid base64: {e}"),
                }),
            )
                .into_response()
        }
    };

    let result = timeout(Duration::from_secs(5), async {
        let mut stream = TcpStream::connect((state.modbus_host.as_str(), state.modbus_port)).await?;
        stream.write_all(&frame).await?;
        let mut buf = vec![0u8; 260];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok::<_, std::io::Error>(buf)
    })
    .await;

    match result {
        Ok(Ok(response)) => Json(ModbusResponse {
            length: response.len(),
            data: BASE64.encode(&response),
        })
        .into_response(),
        Ok(Err(e)) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorBody {
                error: format!("modbus error: {e}"),
            }),
        )
            .into_response(),
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ErrorBody {
                error: "modbus timeout".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn handle_index() -> impl IntoResponse {
    axum::response::Html(
        "<html><body><h1>Modbus HTTP Bridge</h1>\
         <p>POST /modbus with {\"data\": \"&lt;base64 Modbus frame&gt;\"}</p>\
         <p>GET /health for a status check.</p></body></html>",
    )
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/modbus", post(handle_modbus))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let state = Arc::new(AppState {
        modbus_host: args.modbus_host,
        modbus_port: args.modbus_port,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP bridge listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
