//! Spendable credit balances.
//!
//! Every debit and refund is keyed by the job it pays for, so a job is charged
//! at most once and refunded at most once. [`SqliteCreditLedger`] is the
//! durable implementation; [`InMemoryCreditLedger`] locks each account
//! independently and keeps nothing across restarts.

use crate::storage::database::{parse_timestamp, parse_uuid, timestamp};
use crate::storage::SharedDatabase;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Debit,
    Refund,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Debit => "debit",
            EntryKind::Refund => "refund",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "debit" => Some(EntryKind::Debit),
            "refund" => Some(EntryKind::Refund),
            _ => None,
        }
    }
}

/// One balance movement, kept for reconciliation sweeps.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerEntry {
    pub job_id: Uuid,
    pub kind: EntryKind,
    pub amount: u32,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Create a profile with `credits` if none exists. Returns the current balance.
    async fn open_account(&self, user_id: &str, credits: u32) -> Result<u32>;

    async fn balance(&self, user_id: &str) -> Result<u32>;

    /// Atomically check `balance > 0` and take one credit for `job_id`.
    /// Returns the remaining balance.
    async fn debit(&self, user_id: &str, job_id: Uuid) -> Result<u32>;

    /// Compensating refund for a job previously debited. Returns the new balance.
    async fn credit(&self, user_id: &str, job_id: Uuid, amount: u32) -> Result<u32>;

    async fn entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>>;
}

#[derive(Debug, Default)]
struct Account {
    balance: u32,
    debited: HashSet<Uuid>,
    refunded: HashSet<Uuid>,
    entries: Vec<LedgerEntry>,
}

impl Account {
    fn record(&mut self, job_id: Uuid, kind: EntryKind, amount: u32) {
        self.entries.push(LedgerEntry {
            job_id,
            kind,
            amount,
            at: Utc::now(),
        });
    }
}

/// Process-local ledger for tests and demos.
///
/// The per-job debit/refund sets and the entry log are never pruned, so memory
/// grows with the number of jobs charged. Use [`SqliteCreditLedger`] for a
/// long-running service.
#[derive(Default)]
pub struct InMemoryCreditLedger {
    accounts: DashMap<String, Account>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, user_id: &str, credits: u32) -> Self {
        self.accounts.insert(
            user_id.to_string(),
            Account {
                balance: credits,
                ..Account::default()
            },
        );
        self
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn open_account(&self, user_id: &str, credits: u32) -> Result<u32> {
        match self.accounts.entry(user_id.to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().balance),
            Entry::Vacant(slot) => {
                info!("Opened profile {} with {} credits", user_id, credits);
                slot.insert(Account {
                    balance: credits,
                    ..Account::default()
                });
                Ok(credits)
            }
        }
    }

    async fn balance(&self, user_id: &str) -> Result<u32> {
        self.accounts
            .get(user_id)
            .map(|account| account.balance)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    async fn debit(&self, user_id: &str, job_id: Uuid) -> Result<u32> {
        let mut account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        if account.debited.contains(&job_id) {
            debug!("[{}] Job already debited, skipping", job_id);
            return Ok(account.balance);
        }
        if account.balance == 0 {
            return Err(Error::InsufficientCredit(user_id.to_string()));
        }

        account.balance -= 1;
        account.debited.insert(job_id);
        account.record(job_id, EntryKind::Debit, 1);
        debug!(
            "[{}] Debited 1 credit from {} ({} remaining)",
            job_id, user_id, account.balance
        );
        Ok(account.balance)
    }

    async fn credit(&self, user_id: &str, job_id: Uuid, amount: u32) -> Result<u32> {
        let mut account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        if !account.debited.contains(&job_id) {
            warn!(
                "[{}] Refund requested for a job that was never debited, ignoring",
                job_id
            );
            return Ok(account.balance);
        }
        if !account.refunded.insert(job_id) {
            debug!("[{}] Job already refunded, skipping", job_id);
            return Ok(account.balance);
        }

        account.balance = account.balance.saturating_add(amount);
        account.record(job_id, EntryKind::Refund, amount);
        info!(
            "[{}] Refunded {} credit(s) to {} (balance {})",
            job_id, amount, user_id, account.balance
        );
        Ok(account.balance)
    }

    async fn entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        self.accounts
            .get(user_id)
            .map(|account| account.entries.clone())
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }
}

/// Ledger persisted in the `profiles` and `credit_entries` tables.
///
/// The debit is a single conditional `UPDATE ... WHERE credits > 0`, and the
/// `(job_id, kind)` key on `credit_entries` makes debits and refunds
/// idempotent per job.
#[derive(Clone)]
pub struct SqliteCreditLedger {
    db: SharedDatabase,
}

impl SqliteCreditLedger {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

fn current_balance(conn: &Connection, user_id: &str) -> Result<u32> {
    conn.query_row(
        "SELECT credits FROM profiles WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
}

fn has_entry(conn: &Connection, job_id: Uuid, kind: EntryKind) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM credit_entries WHERE job_id = ?1 AND kind = ?2",
            params![job_id.to_string(), kind.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Returns false when the entry already existed.
fn insert_entry(
    conn: &Connection,
    user_id: &str,
    job_id: Uuid,
    kind: EntryKind,
    amount: u32,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO credit_entries (job_id, user_id, kind, amount, at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            job_id.to_string(),
            user_id,
            kind.as_str(),
            amount,
            timestamp(Utc::now())
        ],
    )?;
    Ok(inserted == 1)
}

#[async_trait]
impl CreditLedger for SqliteCreditLedger {
    async fn open_account(&self, user_id: &str, credits: u32) -> Result<u32> {
        let user_id = user_id.to_string();
        self.db
            .run(move |db| {
                db.transaction(|conn| {
                    let created = conn.execute(
                        "INSERT OR IGNORE INTO profiles (id, credits, created_at) VALUES (?1, ?2, ?3)",
                        params![user_id, credits, timestamp(Utc::now())],
                    )?;
                    if created == 1 {
                        info!("Opened profile {} with {} credits", user_id, credits);
                    }
                    current_balance(conn, &user_id)
                })
            })
            .await
    }

    async fn balance(&self, user_id: &str) -> Result<u32> {
        let user_id = user_id.to_string();
        self.db
            .run(move |db| current_balance(&*db.conn()?, &user_id))
            .await
    }

    async fn debit(&self, user_id: &str, job_id: Uuid) -> Result<u32> {
        let user_id = user_id.to_string();
        self.db
            .run(move |db| {
                db.transaction(|conn| {
                    let balance = current_balance(conn, &user_id)?;
                    if has_entry(conn, job_id, EntryKind::Debit)? {
                        debug!("[{}] Job already debited, skipping", job_id);
                        return Ok(balance);
                    }

                    let updated = conn.execute(
                        "UPDATE profiles SET credits = credits - 1 WHERE id = ?1 AND credits > 0",
                        params![user_id],
                    )?;
                    if updated == 0 {
                        return Err(Error::InsufficientCredit(user_id.clone()));
                    }

                    insert_entry(conn, &user_id, job_id, EntryKind::Debit, 1)?;
                    let remaining = current_balance(conn, &user_id)?;
                    debug!(
                        "[{}] Debited 1 credit from {} ({} remaining)",
                        job_id, user_id, remaining
                    );
                    Ok(remaining)
                })
            })
            .await
    }

    async fn credit(&self, user_id: &str, job_id: Uuid, amount: u32) -> Result<u32> {
        let user_id = user_id.to_string();
        self.db
            .run(move |db| {
                db.transaction(|conn| {
                    let balance = current_balance(conn, &user_id)?;
                    if !has_entry(conn, job_id, EntryKind::Debit)? {
                        warn!(
                            "[{}] Refund requested for a job that was never debited, ignoring",
                            job_id
                        );
                        return Ok(balance);
                    }
                    if !insert_entry(conn, &user_id, job_id, EntryKind::Refund, amount)? {
                        debug!("[{}] Job already refunded, skipping", job_id);
                        return Ok(balance);
                    }

                    conn.execute(
                        "UPDATE profiles SET credits = credits + ?2 WHERE id = ?1",
                        params![user_id, amount],
                    )?;
                    let balance = current_balance(conn, &user_id)?;
                    info!(
                        "[{}] Refunded {} credit(s) to {} (balance {})",
                        job_id, amount, user_id, balance
                    );
                    Ok(balance)
                })
            })
            .await
    }

    async fn entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        let user_id = user_id.to_string();
        self.db
            .run(move |db| {
                let conn = db.conn()?;
                current_balance(&conn, &user_id)?;

                let mut stmt = conn.prepare(
                    "SELECT job_id, kind, amount, at FROM credit_entries
                     WHERE user_id = ?1 ORDER BY rowid",
                )?;
                let rows = stmt.query_map(params![user_id], |row| {
                    let job_id: String = row.get(0)?;
                    let kind: String = row.get(1)?;
                    let at: String = row.get(3)?;
                    Ok(LedgerEntry {
                        job_id: parse_uuid(0, &job_id)?,
                        kind: EntryKind::parse(&kind).ok_or_else(|| {
                            rusqlite::Error::FromSqlConversionFailure(
                                1,
                                Type::Text,
                                format!("unknown entry kind '{}'", kind).into(),
                            )
                        })?,
                        amount: row.get(2)?,
                        at: parse_timestamp(3, &at)?,
                    })
                })?;

                let entries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
    }
}
