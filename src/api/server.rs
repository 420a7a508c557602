//! API server setup.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::routes;
use crate::credentials::CredentialService;
use crate::database::repositories::ItemRepository;
use crate::manager::JobManager;
use crate::sink::SinkApi;
use crate::Result;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub manager: Arc<JobManager>,
    pub items: Arc<dyn ItemRepository>,
    pub sink: Arc<dyn SinkApi>,
    pub credentials: Arc<CredentialService>,
}

/// Build the router with all management routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/health", routes::health::router())
        .nest("/api/jobs", routes::jobs::router())
        .nest("/api/items", routes::items::router())
        .nest("/api/oauth", routes::oauth::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Bind and serve until the root token is cancelled.
pub async fn serve(state: AppState, port: u16, cancel: CancellationToken) -> Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!(%addr, "Management API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Management API stopped");
    Ok(())
}
