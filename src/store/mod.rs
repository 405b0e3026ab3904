//! Persistence layer.
//!
//! SQLite-backed document store for users, contracts, and bets. All
//! settlement reads and writes run inside [`Store::transact`], which
//! wraps a closure in begin/commit and transparently re-runs it when
//! a concurrent writer forces a conflict. Row decoding is validated
//! field by field: anything that does not match the expected shape
//! surfaces as [`BookieError::Corrupt`] instead of a trusted cast.

use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Executor, Row};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::types::{Bet, BookieError, Contract, Pool, User};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        balance REAL NOT NULL CHECK (balance >= 0),
        created_time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS contracts (
        id TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        pot_yes REAL NOT NULL CHECK (pot_yes >= 0),
        pot_no REAL NOT NULL CHECK (pot_no >= 0),
        weight_yes REAL NOT NULL,
        weight_no REAL NOT NULL,
        created_time INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bets (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        contract_id TEXT NOT NULL REFERENCES contracts(id),
        amount REAL NOT NULL,
        outcome TEXT NOT NULL,
        dpm_weight REAL NOT NULL,
        prob_before REAL NOT NULL,
        prob_average REAL NOT NULL,
        prob_after REAL NOT NULL,
        created_time INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_bets_contract ON bets(contract_id)",
];

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the SQLite store. Cheap to clone; all clones share one
/// connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect and ensure the schema exists. The normal entry point.
    pub async fn open(config: &StoreConfig) -> Result<Self, BookieError> {
        let store = Self::connect(config).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Connect without touching the schema (reset tooling, tests).
    pub async fn connect(config: &StoreConfig) -> Result<Self, BookieError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(path = %config.path, "Store opened");
        Ok(Store { pool })
    }

    /// Create any missing tables and indexes.
    pub async fn migrate(&self) -> Result<(), BookieError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ensured");
        Ok(())
    }

    /// The underlying pool, for read paths and tooling that need raw
    /// SQL access.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `op` inside a transaction with retry-on-conflict.
    ///
    /// The closure is handed the transaction's connection and may read
    /// and write freely; if it returns `Ok` the transaction commits,
    /// if it returns `Err` the transaction rolls back and the error
    /// propagates. When SQLite reports a write conflict (a concurrent
    /// transaction committed first), the whole closure is re-run on a
    /// fresh snapshot, up to `max_retries` times with linear backoff,
    /// after which `Conflict` surfaces. No partial effect is ever
    /// visible to other readers.
    pub async fn transact<T, F>(
        &self,
        max_retries: u32,
        backoff: Duration,
        op: F,
    ) -> Result<T, BookieError>
    where
        T: Send,
        F: for<'c> Fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, BookieError>>
            + Send
            + Sync,
    {
        let mut attempt: u32 = 0;
        loop {
            let mut tx = self.pool.begin().await?;

            match op(&mut *tx).await {
                Ok(value) => match tx.commit().await {
                    Ok(()) => return Ok(value),
                    Err(e) if is_conflict(&e) => {
                        if attempt >= max_retries {
                            return Err(BookieError::Conflict);
                        }
                        attempt += 1;
                        debug!(attempt, "Commit conflicted, retrying transaction");
                        tokio::time::sleep(backoff * attempt).await;
                    }
                    Err(e) => return Err(BookieError::Store(e)),
                },
                Err(BookieError::Store(e)) if is_conflict(&e) => {
                    let _ = tx.rollback().await;
                    if attempt >= max_retries {
                        return Err(BookieError::Conflict);
                    }
                    attempt += 1;
                    debug!(attempt, "Write conflicted, retrying transaction");
                    tokio::time::sleep(backoff * attempt).await;
                }
                Err(other) => {
                    let _ = tx.rollback().await;
                    return Err(other);
                }
            }
        }
    }

    // -- Pool-level reads (no transaction needed for single snapshots) --

    pub async fn user(&self, id: &str) -> Result<Option<User>, BookieError> {
        fetch_user(&self.pool, id).await
    }

    pub async fn contract(&self, id: &str) -> Result<Option<Contract>, BookieError> {
        fetch_contract(&self.pool, id).await
    }

    pub async fn bet(&self, id: &str) -> Result<Option<Bet>, BookieError> {
        fetch_bet(&self.pool, id).await
    }

    pub async fn contract_bets(&self, contract_id: &str) -> Result<Vec<Bet>, BookieError> {
        fetch_contract_bets(&self.pool, contract_id).await
    }

    // -- Out-of-core document creation (seeding, ops tooling, tests) --

    pub async fn create_user(&self, user: &User) -> Result<(), BookieError> {
        insert_user(&self.pool, user).await
    }

    pub async fn create_contract(&self, contract: &Contract) -> Result<(), BookieError> {
        insert_contract(&self.pool, contract).await
    }

    /// Insert a demo user pair and a seeded contract, once, when the
    /// store holds no contracts. Development convenience behind the
    /// `store.seed_demo` config flag.
    pub async fn seed_demo(&self) -> Result<(), BookieError> {
        let contracts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contracts")
            .fetch_one(&self.pool)
            .await?;
        if contracts > 0 {
            return Ok(());
        }

        let now = Utc::now().timestamp_millis();
        for (id, name) in [("alice", "Alice"), ("bob", "Bob")] {
            insert_user(
                &self.pool,
                &User {
                    id: id.to_string(),
                    name: name.to_string(),
                    balance: 1000.0,
                    created_time: now,
                },
            )
            .await?;
        }
        insert_contract(
            &self.pool,
            &Contract {
                id: "demo-rain".to_string(),
                question: "Will it rain in Melbourne tomorrow?".to_string(),
                pot: Pool::new(100.0, 100.0),
                dpm_weights: Pool::default(),
                created_time: now,
            },
        )
        .await?;

        info!("Demo data seeded (users: alice, bob; contract: demo-rain)");
        Ok(())
    }
}

/// Whether an error is SQLite telling us a concurrent writer won the
/// race (BUSY, LOCKED, and their extended codes). These are the
/// retryable conflicts; everything else is a real fault.
fn is_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "517"))
                || db.message().contains("database is locked")
                || db.message().contains("database table is locked")
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub async fn fetch_user<'e, E>(exec: E, id: &str) -> Result<Option<User>, BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, name, balance, created_time FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(exec)
        .await?;
    row.map(|r| user_from_row(&r)).transpose()
}

pub async fn fetch_contract<'e, E>(exec: E, id: &str) -> Result<Option<Contract>, BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, question, pot_yes, pot_no, weight_yes, weight_no, created_time
         FROM contracts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    row.map(|r| contract_from_row(&r)).transpose()
}

pub async fn fetch_bet<'e, E>(exec: E, id: &str) -> Result<Option<Bet>, BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, user_id, contract_id, amount, outcome, dpm_weight,
                prob_before, prob_average, prob_after, created_time
         FROM bets WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    row.map(|r| bet_from_row(&r)).transpose()
}

/// All bets on a contract, oldest first.
pub async fn fetch_contract_bets<'e, E>(
    exec: E,
    contract_id: &str,
) -> Result<Vec<Bet>, BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT id, user_id, contract_id, amount, outcome, dpm_weight,
                prob_before, prob_average, prob_after, created_time
         FROM bets WHERE contract_id = ? ORDER BY created_time, id",
    )
    .bind(contract_id)
    .fetch_all(exec)
    .await?;
    rows.iter().map(bet_from_row).collect()
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

pub async fn insert_user<'e, E>(exec: E, user: &User) -> Result<(), BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO users (id, name, balance, created_time) VALUES (?, ?, ?, ?)")
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.balance)
        .bind(user.created_time)
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn insert_contract<'e, E>(exec: E, contract: &Contract) -> Result<(), BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO contracts (id, question, pot_yes, pot_no, weight_yes, weight_no, created_time)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&contract.id)
    .bind(&contract.question)
    .bind(contract.pot.yes)
    .bind(contract.pot.no)
    .bind(contract.dpm_weights.yes)
    .bind(contract.dpm_weights.no)
    .bind(contract.created_time)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn insert_bet<'e, E>(exec: E, bet: &Bet) -> Result<(), BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO bets (id, user_id, contract_id, amount, outcome, dpm_weight,
                           prob_before, prob_average, prob_after, created_time)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&bet.id)
    .bind(&bet.user_id)
    .bind(&bet.contract_id)
    .bind(bet.amount)
    .bind(bet.outcome.to_string())
    .bind(bet.dpm_weight)
    .bind(bet.prob_before)
    .bind(bet.prob_average)
    .bind(bet.prob_after)
    .bind(bet.created_time)
    .execute(exec)
    .await?;
    Ok(())
}

/// Replace a contract's pot and weight totals.
pub async fn update_contract_totals<'e, E>(
    exec: E,
    id: &str,
    pot: &Pool,
    weights: &Pool,
) -> Result<(), BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE contracts SET pot_yes = ?, pot_no = ?, weight_yes = ?, weight_no = ? WHERE id = ?",
    )
    .bind(pot.yes)
    .bind(pot.no)
    .bind(weights.yes)
    .bind(weights.no)
    .bind(id)
    .execute(exec)
    .await?;
    if result.rows_affected() != 1 {
        return Err(BookieError::Corrupt(format!(
            "contract {id} vanished during settlement"
        )));
    }
    Ok(())
}

pub async fn update_user_balance<'e, E>(
    exec: E,
    id: &str,
    balance: f64,
) -> Result<(), BookieError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE users SET balance = ? WHERE id = ?")
        .bind(balance)
        .bind(id)
        .execute(exec)
        .await?;
    if result.rows_affected() != 1 {
        return Err(BookieError::Corrupt(format!(
            "user {id} vanished during settlement"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn user_from_row(row: &SqliteRow) -> Result<User, BookieError> {
    let user = User {
        id: column(row, "id")?,
        name: column(row, "name")?,
        balance: column(row, "balance")?,
        created_time: column(row, "created_time")?,
    };
    if !user.balance.is_finite() || user.balance < 0.0 {
        return Err(BookieError::Corrupt(format!(
            "user {}: balance {} out of range",
            user.id, user.balance
        )));
    }
    Ok(user)
}

fn contract_from_row(row: &SqliteRow) -> Result<Contract, BookieError> {
    let pot = Pool::new(column(row, "pot_yes")?, column(row, "pot_no")?);
    let weights = Pool::new(column(row, "weight_yes")?, column(row, "weight_no")?);
    let id: String = column(row, "id")?;

    for (label, value) in [
        ("pot_yes", pot.yes),
        ("pot_no", pot.no),
        ("weight_yes", weights.yes),
        ("weight_no", weights.no),
    ] {
        if !value.is_finite() {
            return Err(BookieError::Corrupt(format!(
                "contract {id}: {label} is not finite"
            )));
        }
    }
    if pot.yes < 0.0 || pot.no < 0.0 {
        return Err(BookieError::Corrupt(format!(
            "contract {id}: negative pot ({pot})"
        )));
    }

    Ok(Contract {
        id,
        question: column(row, "question")?,
        pot,
        dpm_weights: weights,
        created_time: column(row, "created_time")?,
    })
}

fn bet_from_row(row: &SqliteRow) -> Result<Bet, BookieError> {
    let id: String = column(row, "id")?;
    let outcome_text: String = column(row, "outcome")?;
    let outcome = outcome_text
        .parse()
        .map_err(|_| BookieError::Corrupt(format!("bet {id}: outcome {outcome_text:?}")))?;

    let bet = Bet {
        id,
        user_id: column(row, "user_id")?,
        contract_id: column(row, "contract_id")?,
        amount: column(row, "amount")?,
        outcome,
        dpm_weight: column(row, "dpm_weight")?,
        prob_before: column(row, "prob_before")?,
        prob_average: column(row, "prob_average")?,
        prob_after: column(row, "prob_after")?,
        created_time: column(row, "created_time")?,
    };

    if !bet.amount.is_finite() || bet.amount <= 0.0 {
        return Err(BookieError::Corrupt(format!(
            "bet {}: amount {} out of range",
            bet.id, bet.amount
        )));
    }
    for (label, p) in [
        ("prob_before", bet.prob_before),
        ("prob_average", bet.prob_average),
        ("prob_after", bet.prob_after),
    ] {
        if !(0.0..=1.0).contains(&p) {
            return Err(BookieError::Corrupt(format!(
                "bet {}: {label} {} outside [0,1]",
                bet.id, p
            )));
        }
    }
    Ok(bet)
}

/// Decode one column, naming it in the `Corrupt` error on mismatch.
fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, BookieError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| BookieError::Corrupt(format!("column {name}: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
