//! Request validation ahead of the transactional stage.
//!
//! Rejects unauthorized or malformed wager requests before any store
//! read happens. Side-effect-free: the functions here look only at
//! the request itself.

use crate::types::{BookieError, Outcome, PlaceBetRequest, ValidBet};

/// Longest accepted identifier, in bytes.
pub const MAX_ID_LEN: usize = 64;

/// Largest accepted wager. Keeps the squared-pot terms in the pricing
/// math comfortably inside f64 range.
pub const MAX_WAGER: f64 = 1e12;

/// Check a raw request and produce the typed wager the ledger settles.
///
/// A missing or empty caller identity is `Unauthorized`; everything
/// else wrong with the request is `InvalidArgument` naming the field.
pub fn validate(request: &PlaceBetRequest) -> Result<ValidBet, BookieError> {
    let caller = match request.caller.as_deref() {
        Some(c) if !c.is_empty() => c,
        _ => return Err(BookieError::Unauthorized),
    };
    if !well_formed_id(caller) {
        return Err(BookieError::InvalidArgument {
            field: "callerId",
            reason: format!("malformed identifier {caller:?}"),
        });
    }

    let outcome = request.outcome.parse::<Outcome>()?;

    if !request.amount.is_finite() || request.amount <= 0.0 {
        return Err(BookieError::InvalidArgument {
            field: "amount",
            reason: format!("expected a positive finite number, got {}", request.amount),
        });
    }
    if request.amount > MAX_WAGER {
        return Err(BookieError::InvalidArgument {
            field: "amount",
            reason: format!("exceeds the maximum wager of {MAX_WAGER}"),
        });
    }

    if !well_formed_id(&request.contract_id) {
        return Err(BookieError::InvalidArgument {
            field: "contractId",
            reason: format!("malformed identifier {:?}", request.contract_id),
        });
    }

    Ok(ValidBet {
        user_id: caller.to_string(),
        amount: request.amount,
        outcome,
        contract_id: request.contract_id.clone(),
    })
}

/// Identifiers are non-empty ASCII alphanumerics plus `-` and `_`,
/// at most [`MAX_ID_LEN`] bytes.
fn well_formed_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
