//! API route handlers.
//!
//! The HTTP layer is deliberately dumb: parse, delegate to the
//! [`BetLedger`], map errors. All endpoints return JSON. State is the
//! ledger behind an `Arc<dyn BetLedger>` so tests can swap in a mock.

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use crate::ledger::BetLedger;
use crate::pricing;
use crate::types::{Bet, BookieError, Contract, PlaceBetRequest};

pub type AppState = Arc<dyn BetLedger>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// POST /api/bet request body. The caller identity is not part of the
/// body; it arrives in the `x-caller-id` header from the gateway.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetBody {
    pub amount: f64,
    pub outcome: String,
    pub contract_id: String,
}

/// The response envelope: `{"status":"success"}` on a settled bet,
/// `{"status":"error","message":...}` on any failure.
#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    fn success() -> Self {
        Ack {
            status: "success",
            message: None,
        }
    }

    fn error(message: String) -> Self {
        Ack {
            status: "error",
            message: Some(message),
        }
    }
}

/// GET /api/users/:id response: account identity and balance only.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub balance: f64,
}

/// GET /api/contracts/:id response: the stored snapshot plus the
/// implied probability the next bettor would price against.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractView {
    #[serde(flatten)]
    pub contract: Contract,
    pub implied_probability: f64,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

impl IntoResponse for BookieError {
    fn into_response(self) -> Response {
        let status = match &self {
            BookieError::Unauthorized => StatusCode::UNAUTHORIZED,
            BookieError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            BookieError::UserNotFound(_)
            | BookieError::ContractNotFound(_)
            | BookieError::BetNotFound(_) => StatusCode::NOT_FOUND,
            BookieError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            BookieError::EmptyPool { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BookieError::Conflict => StatusCode::CONFLICT,
            BookieError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            BookieError::Corrupt(_) | BookieError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            debug!(kind = self.kind(), error = %self, "Request rejected");
        }

        // Store internals never reach the wire.
        let message = match &self {
            BookieError::Corrupt(_) | BookieError::Store(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(Ack::error(message))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/bet
pub async fn place_bet(
    State(ledger): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PlaceBetBody>, JsonRejection>,
) -> Result<Json<Ack>, BookieError> {
    let Json(body) = body.map_err(|rejection| BookieError::InvalidArgument {
        field: "body",
        reason: rejection.body_text(),
    })?;

    let request = PlaceBetRequest {
        caller: caller_id(&headers),
        amount: body.amount,
        outcome: body.outcome,
        contract_id: body.contract_id,
    };
    ledger.place_bet(request).await?;
    Ok(Json(Ack::success()))
}

/// GET /api/users/:id
pub async fn get_user(
    State(ledger): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserView>, BookieError> {
    let user = ledger
        .user(&id)
        .await?
        .ok_or(BookieError::UserNotFound(id))?;
    Ok(Json(UserView {
        id: user.id,
        name: user.name,
        balance: user.balance,
    }))
}

/// GET /api/contracts/:id
pub async fn get_contract(
    State(ledger): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContractView>, BookieError> {
    let contract = ledger
        .contract(&id)
        .await?
        .ok_or(BookieError::ContractNotFound(id))?;
    let implied_probability = pricing::implied_probability(&contract.pot);
    Ok(Json(ContractView {
        contract,
        implied_probability,
    }))
}

/// GET /api/contracts/:id/bets
pub async fn get_contract_bets(
    State(ledger): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Bet>>, BookieError> {
    // 404 on an unknown contract, not an empty list.
    ledger
        .contract(&id)
        .await?
        .ok_or_else(|| BookieError::ContractNotFound(id.clone()))?;
    Ok(Json(ledger.contract_bets(&id).await?))
}

/// GET /api/bets/:id
pub async fn get_bet(
    State(ledger): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Bet>, BookieError> {
    let bet = ledger.bet(&id).await?.ok_or(BookieError::BetNotFound(id))?;
    Ok(Json(bet))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Pull the verified caller identity off the request, if the gateway
/// attached one.
fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-caller-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
