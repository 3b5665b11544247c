//! HTTP + WebSocket server for a firm-formation session.
//!
//! Configuration comes from the environment (see [`ExperimentConfig::from_env`]);
//! `PORT` selects the listen port and `LEDGER_PATH` enables ledger persistence.
//! The audit trail goes to stdout as JSON lines; logs go to stderr.

use firm_formation_engine::api;
use firm_formation_engine::audit::StdoutAuditSink;
use firm_formation_engine::{ExperimentConfig, LedgerFile, Session};
use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    let config = match ExperimentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {}", e);
            std::process::exit(2);
        }
    };
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let ledger_file = std::env::var("LEDGER_PATH").ok().map(LedgerFile::new);
    let session = match ledger_file.as_ref().map(LedgerFile::load) {
        Some(Ok(Some(ledger))) => {
            info!("resuming from ledger rounds={}", ledger.last_round().unwrap_or(0));
            Session::with_ledger(config, ledger)
        }
        Some(Err(e)) => {
            error!("cannot load ledger: {}", e);
            std::process::exit(2);
        }
        _ => Session::new(config),
    };
    let session = session.with_audit_sink(Arc::new(StdoutAuditSink));
    info!(
        "session ready max_firm_size={} returns={} formation_seconds={}",
        session.config().max_firm_size,
        session.config().returns.name(),
        session.config().formation_seconds
    );

    let app = api::create_router_with(session, ledger_file);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("bind");
    eprintln!("listening on http://{}", addr);
    axum::serve(listener, app.into_make_service())
        .await
        .expect("serve");
}
