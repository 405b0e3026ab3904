//! Settlement engine.
//!
//! Orchestrates the full place-bet operation: authorize and validate
//! the request up front, then run the read-price-write cycle inside a
//! single store transaction so the bet record, the contract totals,
//! and the bettor's balance commit together or not at all. A deadline
//! bounds the whole attempt, retries included.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pricing;
use crate::store::{self, Store};
use crate::types::{Bet, BookieError, Contract, PlaceBetRequest, Settlement, User, ValidBet};
use crate::validate;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settlement tuning, from the `[settlement]` config table.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Conflict retries before giving up with `Conflict`.
    pub max_retries: u32,
    /// Base pause between retries; grows linearly with the attempt.
    pub retry_backoff: Duration,
    /// Wall-clock bound on one settlement, retries included.
    pub deadline: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            max_retries: 8,
            retry_backoff: Duration::from_millis(10),
            deadline: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// What the transport layer needs from the settlement core.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BetLedger: Send + Sync {
    /// Validate, price, and atomically commit one wager.
    async fn place_bet(&self, request: PlaceBetRequest) -> Result<Settlement, BookieError>;

    async fn user(&self, id: &str) -> Result<Option<User>, BookieError>;

    async fn contract(&self, id: &str) -> Result<Option<Contract>, BookieError>;

    async fn bet(&self, id: &str) -> Result<Option<Bet>, BookieError>;

    /// All bets on a contract, oldest first.
    async fn contract_bets(&self, contract_id: &str) -> Result<Vec<Bet>, BookieError>;
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Production [`BetLedger`] backed by the SQLite [`Store`].
pub struct Ledger {
    store: Store,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(store: Store, config: LedgerConfig) -> Self {
        Ledger { store, config }
    }

    /// One read-price-write cycle inside a store transaction. The
    /// closure may run several times under contention, so every
    /// attempt re-reads the user and contract from its own snapshot
    /// and reprices against what it read.
    async fn settle(&self, valid: &ValidBet) -> Result<Settlement, BookieError> {
        let valid = valid.clone();
        self.store
            .transact(
                self.config.max_retries,
                self.config.retry_backoff,
                move |conn| {
                    let valid = valid.clone();
                    Box::pin(async move {
                        let user = store::fetch_user(&mut *conn, &valid.user_id)
                            .await?
                            .ok_or_else(|| BookieError::UserNotFound(valid.user_id.clone()))?;
                        if !user.can_afford(valid.amount) {
                            return Err(BookieError::InsufficientBalance {
                                needed: valid.amount,
                                available: user.balance,
                            });
                        }

                        let contract = store::fetch_contract(&mut *conn, &valid.contract_id)
                            .await?
                            .ok_or_else(|| {
                                BookieError::ContractNotFound(valid.contract_id.clone())
                            })?;

                        let quote = pricing::quote(
                            &contract.pot,
                            &contract.dpm_weights,
                            user.balance,
                            valid.amount,
                            valid.outcome,
                        )?;

                        let bet = Bet {
                            id: Uuid::new_v4().to_string(),
                            user_id: valid.user_id.clone(),
                            contract_id: valid.contract_id.clone(),
                            amount: valid.amount,
                            outcome: valid.outcome,
                            dpm_weight: quote.dpm_weight,
                            prob_before: quote.prob_before,
                            prob_average: quote.prob_average,
                            prob_after: quote.prob_after,
                            created_time: Utc::now().timestamp_millis(),
                        };

                        store::insert_bet(&mut *conn, &bet).await?;
                        store::update_contract_totals(
                            &mut *conn,
                            &contract.id,
                            &quote.new_pot,
                            &quote.new_weights,
                        )
                        .await?;
                        store::update_user_balance(&mut *conn, &valid.user_id, quote.new_balance)
                            .await?;

                        Ok(Settlement {
                            bet,
                            new_balance: quote.new_balance,
                        })
                    })
                },
            )
            .await
    }
}

#[async_trait]
impl BetLedger for Ledger {
    async fn place_bet(&self, request: PlaceBetRequest) -> Result<Settlement, BookieError> {
        // Reject malformed requests before any store access.
        let valid = validate::validate(&request)?;
        debug!(
            user = %valid.user_id,
            contract = %valid.contract_id,
            amount = valid.amount,
            outcome = %valid.outcome,
            "Bet accepted for settlement"
        );

        let settled = tokio::time::timeout(self.config.deadline, self.settle(&valid)).await;
        let settlement = match settled {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    user = %valid.user_id,
                    contract = %valid.contract_id,
                    "Settlement deadline exceeded"
                );
                Err(BookieError::Timeout)
            }
        }?;

        info!(
            bet = %settlement.bet.id,
            user = %valid.user_id,
            contract = %valid.contract_id,
            amount = valid.amount,
            outcome = %valid.outcome,
            prob_after = settlement.bet.prob_after,
            "Bet settled"
        );
        Ok(settlement)
    }

    async fn user(&self, id: &str) -> Result<Option<User>, BookieError> {
        self.store.user(id).await
    }

    async fn contract(&self, id: &str) -> Result<Option<Contract>, BookieError> {
        self.store.contract(id).await
    }

    async fn bet(&self, id: &str) -> Result<Option<Bet>, BookieError> {
        self.store.bet(id).await
    }

    async fn contract_bets(&self, contract_id: &str) -> Result<Vec<Bet>, BookieError> {
        self.store.contract_bets(contract_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
