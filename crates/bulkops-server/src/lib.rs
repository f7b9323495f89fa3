pub mod error;
pub mod history;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Bulk-action sessions
        .route("/ws/bulk/{action}", get(routes::bulk::bulk_socket))
        // Health
        .route("/api/health", get(routes::health::health))
        // Catalog
        .route("/api/actions", get(routes::catalog::list_actions))
        .route("/api/projects", get(routes::catalog::list_projects))
        .route(
            "/api/projects/{id}/environments",
            get(routes::catalog::list_environments),
        )
        // Run history
        .route("/api/runs", get(routes::runs::list_runs))
        .route("/api/runs/{id}", get(routes::runs::get_run))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the server for the project at `root` and run until ctrl-c.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let app_state = AppState::load(root)?;
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(app_state, listener, shutdown_signal()).await
}

/// Serve on a pre-bound listener until `shutdown` resolves.
///
/// Lets the caller read the actual port first (useful when binding port 0).
pub async fn serve_on(
    app_state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let actions: Vec<_> = app_state.engines.keys().cloned().collect();
    let app = build_router(app_state);

    tracing::info!(?actions, "bulkops server listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("bulkops server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
