use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use tokio::sync::watch;

use crate::snapshot::Snapshot;

/// Serves the most recent snapshot as a flat JSON document.
///
/// Every GET on any path returns 200 with whatever the sampling loop last
/// published; before the first cycle that is an empty snapshot. Each
/// request takes its own consistent copy out of the watch channel, so a
/// concurrent publish is either fully visible or not at all.
pub async fn serve(port: u16, snapshot: watch::Receiver<Snapshot>) -> Result<(), anyhow::Error> {
    let app = Router::new().fallback(get(latest)).with_state(snapshot);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind web service port {port}"))?;
    log::info!("serving snapshot api at port {port}");

    axum::serve(listener, app)
        .await
        .context("Snapshot api server failed")
}

async fn latest(State(snapshot): State<watch::Receiver<Snapshot>>) -> Json<Snapshot> {
    let current = snapshot.borrow().clone();
    Json(current)
}
