use std::sync::Arc;

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use plend_service::LoanLifecycleService;

use crate::auth::{Action, AuthProvider, Caller, TokenAuth};
use crate::error::{ServerError, ServerResult};
use crate::handler;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LoanLifecycleService>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    /// State authenticating against the service's configured token table.
    pub fn new(service: Arc<LoanLifecycleService>) -> Self {
        let auth = Arc::new(TokenAuth::from_config(&service.config().server));
        Self::with_auth(service, auth)
    }

    pub fn with_auth(service: Arc<LoanLifecycleService>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { service, auth }
    }

    pub(crate) async fn authorize(&self, caller: &Caller, action: Action) -> ServerResult<()> {
        if self.auth.authorize(caller, action).await? {
            return Ok(());
        }
        match caller.address() {
            None => Err(ServerError::Unauthenticated(action.describe())),
            Some(_) => Err(ServerError::Forbidden(action.describe())),
        }
    }
}

impl FromRef<AppState> for Arc<dyn AuthProvider> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.auth)
    }
}

/// Build the axum router with all PrivLend endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health))
        .route("/v1/proofs", post(handler::register_proof))
        .route("/v1/loans", get(handler::list_loans).post(handler::create_loan))
        .route("/v1/loans/:loan_id", get(handler::get_loan))
        .route("/v1/loans/:loan_id/cancel", post(handler::cancel_loan))
        .route("/v1/loans/:loan_id/apply", post(handler::apply))
        .route("/v1/loans/:loan_id/approve", post(handler::approve))
        .route("/v1/loans/:loan_id/repay", post(handler::repay))
        .route("/v1/loans/:loan_id/default", post(handler::trigger_default))
        .route(
            "/v1/loans/:loan_id/applications",
            get(handler::applications_for_loan),
        )
        .route(
            "/v1/loans/:loan_id/applications/:commitment",
            get(handler::get_application),
        )
        .route(
            "/v1/loans/:loan_id/applications/:commitment/identity",
            get(handler::revealed_identity),
        )
        .route(
            "/v1/commitments/:commitment/applications",
            get(handler::applications_for_commitment),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
