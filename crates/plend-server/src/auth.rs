use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use plend_service::ServerConfig;
use plend_types::Address;

use crate::error::{ServerError, ServerResult};

/// What a request presented to prove who it is.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Anonymous,
}

impl Credentials {
    /// Read `Authorization: Bearer <token>`; a missing header is anonymous.
    pub fn from_parts(parts: &Parts) -> ServerResult<Self> {
        let Some(raw) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Self::Anonymous);
        };
        let raw = raw
            .to_str()
            .map_err(|_| ServerError::BadRequest("authorization header is not ASCII".into()))?;
        match raw.trim().strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Ok(Self::Bearer(token.trim().to_string())),
            _ => Err(ServerError::InvalidCredentials),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Gated operations beyond "has an identity".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Read,
    RegisterProof,
}

impl Action {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::RegisterProof => "register a proof",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Maps credentials to an account and decides what that account may do.
///
/// Ledger-level rules (only the lender approves, only the borrower repays)
/// are enforced by the ledger against the authenticated address.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Caller>;
    async fn authorize(&self, caller: &Caller, action: Action) -> ServerResult<bool>;
}

/// Static token table from [`ServerConfig`].
pub struct TokenAuth {
    tokens: HashMap<String, Address>,
    proof_oracles: HashSet<Address>,
    allow_anonymous_read: bool,
}

impl TokenAuth {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            tokens: config
                .tokens
                .iter()
                .map(|t| (t.token.clone(), t.account))
                .collect(),
            proof_oracles: config.proof_oracles.iter().copied().collect(),
            allow_anonymous_read: config.allow_anonymous_read,
        }
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Caller> {
        match credentials {
            Credentials::Anonymous => Ok(Caller::anonymous()),
            Credentials::Bearer(token) => self
                .tokens
                .get(token)
                .map(|account| Caller(Some(*account)))
                .ok_or(ServerError::InvalidCredentials),
        }
    }

    async fn authorize(&self, caller: &Caller, action: Action) -> ServerResult<bool> {
        Ok(match action {
            Action::Read => caller.address().is_some() || self.allow_anonymous_read,
            Action::RegisterProof => caller
                .address()
                .is_some_and(|account| self.proof_oracles.contains(account)),
        })
    }
}

/// The authenticated account a request acts as; `None` for anonymous
/// requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller(pub Option<Address>);

impl Caller {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn address(&self) -> Option<&Address> {
        self.0.as_ref()
    }

    /// The caller's address, or `Unauthenticated` for anonymous requests.
    pub fn require(&self, action: &'static str) -> ServerResult<Address> {
        self.0.ok_or(ServerError::Unauthenticated(action))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    Arc<dyn AuthProvider>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = <Arc<dyn AuthProvider> as FromRef<S>>::from_ref(state);
        let credentials = Credentials::from_parts(parts)?;
        auth.authenticate(&credentials).await
    }
}
