use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use plend_service::{LoanLifecycleService, ServerConfig};

use crate::error::{ServerError, ServerResult};
use crate::router::{build_router, AppState};

/// PrivLend HTTP server.
pub struct PlendServer {
    config: ServerConfig,
    service: Arc<LoanLifecycleService>,
}

impl PlendServer {
    pub fn new(service: Arc<LoanLifecycleService>) -> Self {
        let config = service.config().server.clone();
        Self { config, service }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(Arc::clone(&self.service)))
    }

    /// Serve until `shutdown` flips to `true` or its sender is dropped.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "PrivLend server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
