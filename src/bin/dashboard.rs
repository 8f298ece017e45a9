//! Read-only web dashboard: tails the firewall's CSV transaction log and
//! serves aggregate counters plus the most recent records as JSON, with a
//! small static HTML page that polls them.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(about = "Web dashboard over a modbus-firewall CSV transaction log")]
struct Args {
    /// Path to the firewall's transaction log (and numbered rotation backups)
    #[clap(long, default_value = "modbus_firewall.log.csv")]
    log_file: PathBuf,
    #[clap(long, default_value_t = 9090)]
    port: u16,
    /// Number of most recent records to expose via /api/logs
    #[clap(long, default_value_t = 200)]
    tail: usize,
}

struct AppState {
    log_file: PathBuf,
    tail: usize,
}

#[derive(Serialize, Default)]
struct Stats {
    total: u64,
    allowed: u64,
    blocked: u64,
    errors: u64,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    transaction_id: String,
    source_ip: String,
    source_port: String,
    function_code: String,
    function_name: String,
    action: String,
    reason: String,
    unit_id: String,
    data_length: String,
}

fn read_records(log_file: &PathBuf) -> Vec<csv::StringRecord> {
    match csv::Reader::from_path(log_file) {
        Ok(mut reader) => reader.records().filter_map(Result::ok).collect(),
        Err(_) => Vec::new(),
    }
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut stats = Stats::default();
    for record in read_records(&state.log_file) {
        stats.total += 1;
        match record.get(6) {
            Some("ALLOW") => stats.allowed += 1,
            Some("BLOCK") => stats.blocked += 1,
            Some("ERROR") => stats.errors += 1,
            _ => {}
        }
    }
    Json(stats)
}

async fn handle_logs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let records = read_records(&state.log_file);
    let entries: Vec<LogEntry> = records
        .iter()
        .rev()
        .take(state.tail)
        .map(|record| LogEntry {
            timestamp: record.get(0).unwrap_or_default().to_string(),
            transaction_id: record.get(1).unwrap_or_default().to_string(),
            source_ip: record.get(2).unwrap_or_default().to_string(),
            source_port: record.get(3).unwrap_or_default().to_string(),
            function_code: record.get(4).unwrap_or_default().to_string(),
            function_name: record.get(5).unwrap_or_default().to_string(),
            action: record.get(6).unwrap_or_default().to_string(),
            reason: record.get(7).unwrap_or_default().to_string(),
            unit_id: record.get(8).unwrap_or_default().to_string(),
            data_length: record.get(9).unwrap_or_default().to_string(),
        })
        .collect();
    Json(entries)
}

async fn handle_index() -> impl IntoResponse {
    Html(include_str!("../../demos-src/dashboard_index.html"))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/stats", get(handle_stats))
        .route("/api/logs", get(handle_logs))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let state = Arc::new(AppState {
        log_file: args.log_file,
        tail: args.tail,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "dashboard listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
