//! Tiny local status endpoint an external metrics scraper can poll, the
//! Rust analogue of the original's commented-out GCE metrics push.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

#[derive(Default)]
pub struct BusyFlag(AtomicBool);

impl BusyFlag {
    pub fn set(&self, busy: bool) {
        self.0.store(busy, Ordering::Relaxed);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    busy: bool,
}

async fn handle_healthz(State(flag): State<Arc<BusyFlag>>) -> Json<HealthResponse> {
    Json(HealthResponse { busy: flag.get() })
}

/// Serve `/healthz` on `bind_addr` until the process exits. Spawned as a
/// detached background task; its failure is logged, not fatal.
pub async fn serve(bind_addr: SocketAddr, flag: Arc<BusyFlag>) -> std::io::Result<()> {
    let router = Router::new().route("/healthz", get(handle_healthz)).with_state(flag);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router).await
}
