//! HTTP transport over the engine

mod routes;

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{engine::AskEngine, error::{EngineError, Result}};

pub use routes::{cors_layer, create_router, status_for, ApiError};

/// Bind the configured address and serve until ctrl-c
pub async fn serve(engine: Arc<AskEngine>) -> Result<()> {
    let address = engine.config().server.bind_address();
    let listener = TcpListener::bind(&address).await.map_err(|e| EngineError::Initialization {
        message: format!("Failed to bind {address}"),
        source: Some(Box::new(e)),
    })?;

    info!(
        address = %address,
        route = %engine.config().server.route_path,
        "Listening"
    );

    axum::serve(listener, create_router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| EngineError::Initialization {
            message: "Server terminated unexpectedly".to_string(),
            source: Some(Box::new(e)),
        })?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
