//! HTTP server for PrivLend.
//!
//! Exposes the loan lifecycle service as a JSON API. Callers authenticate
//! with `Authorization: Bearer <token>`; each configured token maps to one
//! account. Requests without credentials are anonymous and may only read,
//! and only configured proof oracles may register proofs.

pub mod auth;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use auth::{Action, AuthProvider, Caller, Credentials, TokenAuth};
pub use error::{ServerError, ServerResult};
pub use router::{build_router, AppState};
pub use server::PlendServer;
