//! Shared types for the BOOKIE settlement engine.
//!
//! These types form the data model used across all modules: the
//! documents held in the store (users, contracts, bets), the request
//! shapes that arrive at the settlement boundary, and the crate-wide
//! error taxonomy.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The side of a binary contract a wager is placed on.
///
/// Serializes as the wire literals `"YES"` / `"NO"`; parsing is
/// case-sensitive because the request contract admits exactly those
/// two strings and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = BookieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "YES" => Ok(Outcome::Yes),
            "NO" => Ok(Outcome::No),
            other => Err(BookieError::InvalidArgument {
                field: "outcome",
                reason: format!("expected \"YES\" or \"NO\", got {other:?}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// A pair of per-side amounts on a binary contract.
///
/// Used for both the liquidity pot (currency committed to each side)
/// and the running dynamic-parimutuel weight totals. Stored documents
/// and API payloads carry the sides under the literal `"YES"` / `"NO"`
/// keys.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pool {
    #[serde(rename = "YES")]
    pub yes: f64,
    #[serde(rename = "NO")]
    pub no: f64,
}

impl Pool {
    pub fn new(yes: f64, no: f64) -> Self {
        Pool { yes, no }
    }

    /// The amount on the given side.
    pub fn get(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }

    /// A new pool with `amount` added to the given side; the other
    /// side is untouched.
    pub fn credit(&self, outcome: Outcome, amount: f64) -> Self {
        match outcome {
            Outcome::Yes => Pool { yes: self.yes + amount, no: self.no },
            Outcome::No => Pool { yes: self.yes, no: self.no + amount },
        }
    }

    /// Sum of both sides.
    pub fn total(&self) -> f64 {
        self.yes + self.no
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "YES: {:.2} | NO: {:.2}", self.yes, self.no)
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A user account. The balance is mutated only by settled
/// transactions and never goes negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub balance: f64,
    /// Creation time, epoch milliseconds.
    pub created_time: i64,
}

impl User {
    /// Whether the balance covers a wager of `amount`.
    pub fn can_afford(&self, amount: f64) -> bool {
        self.balance >= amount
    }

    #[cfg(test)]
    pub fn sample() -> Self {
        User {
            id: "user-001".to_string(),
            name: "alice".to_string(),
            balance: 1000.0,
            created_time: 1_700_000_000_000,
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] (${:.2})", self.name, self.id, self.balance)
    }
}

/// A binary-outcome contract priced by the dynamic-parimutuel pool.
///
/// Created out-of-core with seed liquidity on both sides; this core
/// only ever mutates `pot` and `dpm_weights`, atomically with the bet
/// that caused the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub question: String,
    pub pot: Pool,
    pub dpm_weights: Pool,
    /// Creation time, epoch milliseconds.
    pub created_time: i64,
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.id, self.question, self.pot)
    }
}

impl Contract {
    #[cfg(test)]
    pub fn sample() -> Self {
        Contract {
            id: "contract-001".to_string(),
            question: "Will it rain in Melbourne tomorrow?".to_string(),
            pot: Pool::new(100.0, 100.0),
            dpm_weights: Pool::default(),
            created_time: 1_700_000_000_000,
        }
    }
}

/// An immutable record of one settled wager. Append-only: never
/// mutated or deleted once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    pub contract_id: String,
    pub amount: f64,
    pub outcome: Outcome,
    /// This bet's share of the payout pool on its side.
    pub dpm_weight: f64,
    /// YES-side implied probability before the trade.
    pub prob_before: f64,
    /// Average fill price across the trade, on the side bought.
    pub prob_average: f64,
    /// YES-side implied probability after the trade.
    pub prob_after: f64,
    /// Creation time, epoch milliseconds.
    pub created_time: i64,
}

impl Bet {
    /// Creation time as a UTC datetime, if the stored millisecond
    /// value is representable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_time).single()
    }
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ${:.2} @ avg {:.1}% ({:.1}% -> {:.1}%) w={:.4} [{}]",
            self.contract_id,
            self.outcome,
            self.amount,
            self.prob_average * 100.0,
            self.prob_before * 100.0,
            self.prob_after * 100.0,
            self.dpm_weight,
            self.id,
        )
    }
}

// ---------------------------------------------------------------------------
// Request & receipt types
// ---------------------------------------------------------------------------

/// A wager request as it arrives at the settlement boundary, identity
/// and all, before any validation has run.
#[derive(Debug, Clone)]
pub struct PlaceBetRequest {
    /// Verified caller identity, if the transport attached one.
    pub caller: Option<String>,
    pub amount: f64,
    pub outcome: String,
    pub contract_id: String,
}

/// A wager request that passed validation: identity present, outcome
/// parsed, amount positive and finite, identifiers well-formed.
#[derive(Debug, Clone)]
pub struct ValidBet {
    pub user_id: String,
    pub amount: f64,
    pub outcome: Outcome,
    pub contract_id: String,
}

/// Receipt returned after a settlement commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub bet: Bet,
    pub new_balance: f64,
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} balance=${:.2}", self.bet, self.new_balance)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error taxonomy for BOOKIE.
///
/// Validation failures (`Unauthorized`, `InvalidArgument`) are raised
/// before any store access. Transactional failures (`UserNotFound`,
/// `ContractNotFound`, `InsufficientBalance`, `EmptyPool`) abort the
/// whole atomic scope with zero side effects. `Conflict` and
/// `Timeout` surface only after retries or the deadline are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum BookieError {
    #[error("Not authorized")]
    Unauthorized,

    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Contract not found: {0}")]
    ContractNotFound(String),

    #[error("Bet not found: {0}")]
    BetNotFound(String),

    #[error("Insufficient balance: need ${needed:.2}, have ${available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("No liquidity to price against (pot YES=${yes:.2}, NO=${no:.2})")]
    EmptyPool { yes: f64, no: f64 },

    #[error("Concurrent write conflict, retries exhausted")]
    Conflict,

    #[error("Settlement deadline exceeded")]
    Timeout,

    #[error("Corrupt stored record: {0}")]
    Corrupt(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl BookieError {
    /// Stable machine-readable kind, for log fields and callers that
    /// branch on the error class rather than the message text.
    pub fn kind(&self) -> &'static str {
        match self {
            BookieError::Unauthorized => "unauthorized",
            BookieError::InvalidArgument { .. } => "invalid_argument",
            BookieError::UserNotFound(_)
            | BookieError::ContractNotFound(_)
            | BookieError::BetNotFound(_) => "not_found",
            BookieError::InsufficientBalance { .. } => "insufficient_balance",
            BookieError::EmptyPool { .. } => "empty_pool",
            BookieError::Conflict => "conflict",
            BookieError::Timeout => "timeout",
            BookieError::Corrupt(_) => "corrupt",
            BookieError::Store(_) => "store",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
