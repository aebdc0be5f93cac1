use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use plend_index::IndexEntry;
use plend_ledger::{ApplicationView, LoanOffer, OfferTerms};
use plend_proofs::ActivityProof;
use plend_service::ServiceStatus;
use plend_types::{Address, Commitment, LoanId, ProofHash};

use crate::auth::{Action, Caller};
use crate::error::{ServerError, ServerResult};
use crate::router::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub service: ServiceStatus,
}

#[derive(Debug, Deserialize)]
pub struct RegisterProofRequest {
    pub proof_hash: ProofHash,
    pub commitment: Commitment,
    pub score: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLoansQuery {
    /// Hex address; lists every offer by this lender instead of the open ones.
    pub lender: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLoanResponse {
    pub loan_id: LoanId,
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub proof_hash: ProofHash,
    pub commitment: Commitment,
}

#[derive(Debug, Deserialize)]
pub struct CommitmentRequest {
    pub commitment: Commitment,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevealedIdentity {
    pub loan_id: LoanId,
    pub commitment: Commitment,
    pub borrower_address: Address,
}

fn parse_commitment(raw: String) -> ServerResult<Commitment> {
    Commitment::new(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

pub async fn health(State(state): State<AppState>) -> ServerResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        service: state.service.status()?,
    }))
}

pub async fn register_proof(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<RegisterProofRequest>,
) -> ServerResult<(StatusCode, Json<ActivityProof>)> {
    state.authorize(&caller, Action::RegisterProof).await?;
    let proof = state
        .service
        .register_proof(req.proof_hash, req.commitment, req.score)?;
    Ok((StatusCode::CREATED, Json(proof)))
}

pub async fn list_loans(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListLoansQuery>,
) -> ServerResult<Json<Vec<LoanOffer>>> {
    state.authorize(&caller, Action::Read).await?;
    let offers = match query.lender {
        Some(raw) => {
            let lender = Address::from_hex(&raw)
                .map_err(|e| ServerError::BadRequest(format!("lender: {e}")))?;
            state.service.get_loans_by_lender(&lender)?
        }
        None => state.service.get_available_loans()?,
    };
    Ok(Json(offers))
}

pub async fn create_loan(
    State(state): State<AppState>,
    caller: Caller,
    Json(terms): Json<OfferTerms>,
) -> ServerResult<(StatusCode, Json<CreateLoanResponse>)> {
    let lender = caller.require("create an offer")?;
    let loan_id = state.service.create_loan_offer(&lender, &terms)?;
    info!(%loan_id, lender = %lender.short_id(), "offer created over http");
    Ok((StatusCode::CREATED, Json(CreateLoanResponse { loan_id })))
}

pub async fn get_loan(
    State(state): State<AppState>,
    caller: Caller,
    Path(loan_id): Path<u64>,
) -> ServerResult<Json<LoanOffer>> {
    state.authorize(&caller, Action::Read).await?;
    Ok(Json(state.service.get_loan_details(LoanId::new(loan_id))?))
}

pub async fn cancel_loan(
    State(state): State<AppState>,
    caller: Caller,
    Path(loan_id): Path<u64>,
) -> ServerResult<Json<LoanOffer>> {
    let lender = caller.require("cancel an offer")?;
    Ok(Json(
        state
            .service
            .cancel_loan_offer(&lender, LoanId::new(loan_id))?,
    ))
}

pub async fn apply(
    State(state): State<AppState>,
    caller: Caller,
    Path(loan_id): Path<u64>,
    Json(req): Json<ApplyRequest>,
) -> ServerResult<(StatusCode, Json<ApplicationView>)> {
    let borrower = caller.require("apply")?;
    let view = state.service.apply_for_loan(
        &borrower,
        LoanId::new(loan_id),
        req.proof_hash,
        req.commitment,
    )?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn approve(
    State(state): State<AppState>,
    caller: Caller,
    Path(loan_id): Path<u64>,
    Json(req): Json<CommitmentRequest>,
) -> ServerResult<Json<ApplicationView>> {
    let lender = caller.require("approve")?;
    Ok(Json(state.service.approve_borrower(
        &lender,
        LoanId::new(loan_id),
        &req.commitment,
    )?))
}

pub async fn repay(
    State(state): State<AppState>,
    caller: Caller,
    Path(loan_id): Path<u64>,
    Json(req): Json<CommitmentRequest>,
) -> ServerResult<Json<ApplicationView>> {
    let borrower = caller.require("repay")?;
    Ok(Json(state.service.repay_loan(
        &borrower,
        LoanId::new(loan_id),
        &req.commitment,
    )?))
}

pub async fn trigger_default(
    State(state): State<AppState>,
    caller: Caller,
    Path(loan_id): Path<u64>,
    Json(req): Json<CommitmentRequest>,
) -> ServerResult<Json<ApplicationView>> {
    let trigger = caller.require("trigger a default")?;
    Ok(Json(state.service.trigger_default(
        &trigger,
        LoanId::new(loan_id),
        &req.commitment,
    )?))
}

pub async fn applications_for_loan(
    State(state): State<AppState>,
    caller: Caller,
    Path(loan_id): Path<u64>,
) -> ServerResult<Json<Vec<IndexEntry>>> {
    state.authorize(&caller, Action::Read).await?;
    Ok(Json(
        state
            .service
            .get_applications_for_loan(LoanId::new(loan_id))?,
    ))
}

pub async fn get_application(
    State(state): State<AppState>,
    caller: Caller,
    Path((loan_id, commitment)): Path<(u64, String)>,
) -> ServerResult<Json<ApplicationView>> {
    state.authorize(&caller, Action::Read).await?;
    let commitment = parse_commitment(commitment)?;
    Ok(Json(state.service.get_application(
        caller.address(),
        LoanId::new(loan_id),
        &commitment,
    )?))
}

pub async fn revealed_identity(
    State(state): State<AppState>,
    caller: Caller,
    Path((loan_id, commitment)): Path<(u64, String)>,
) -> ServerResult<Json<RevealedIdentity>> {
    let lender = caller.require("read a revealed identity")?;
    let loan_id = LoanId::new(loan_id);
    let commitment = parse_commitment(commitment)?;
    let borrower_address = state
        .service
        .get_revealed_identity(&lender, loan_id, &commitment)?;
    Ok(Json(RevealedIdentity {
        loan_id,
        commitment,
        borrower_address,
    }))
}

pub async fn applications_for_commitment(
    State(state): State<AppState>,
    caller: Caller,
    Path(commitment): Path<String>,
) -> ServerResult<Json<Vec<IndexEntry>>> {
    state.authorize(&caller, Action::Read).await?;
    let commitment = parse_commitment(commitment)?;
    Ok(Json(
        state.service.get_applications_for_commitment(&commitment)?,
    ))
}
