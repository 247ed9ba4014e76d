mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Storage failures the rest of the system reacts to. Anything that is not a
/// unique-key conflict surfaces as `Unavailable` (503) so requests never hang
/// on a broken backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key")]
    Conflict,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// User record. Immutable after creation apart from credential rotation,
/// which lives in `refresh_tokens`.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

/// One active long-lived session grant. Only the SHA-256 digest of the
/// presented secret is ever stored; the row is destroyed on rotation, logout
/// or expiry cleanup.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Budget entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Income,
    Expense,
    SavingsDeposit,
    SavingsWithdrawal,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Income => "income",
            EntryKind::Expense => "expense",
            EntryKind::SavingsDeposit => "savings_deposit",
            EntryKind::SavingsWithdrawal => "savings_withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "income" => Some(EntryKind::Income),
            "expense" => Some(EntryKind::Expense),
            "savings_deposit" => Some(EntryKind::SavingsDeposit),
            "savings_withdrawal" => Some(EntryKind::SavingsWithdrawal),
            _ => None,
        }
    }
}

/// A client-identified financial transaction. `id` is the client-chosen
/// identifier, opaque to the server and unique per user. A tombstoned row
/// keeps its place so a replayed `add` can resurrect it.
#[derive(Debug, Clone)]
pub struct BudgetEntry {
    pub id: String,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub kind: EntryKind,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Full row image for the `add` upsert.
#[derive(Debug, Clone)]
pub struct EntryUpsert {
    pub id: String,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub kind: EntryKind,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Partial update for the `update` operation; absent fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub kind: Option<EntryKind>,
}

/// Contract over persistent storage for users, refresh tokens and entries.
///
/// Every entry mutation is a single atomic statement scoped by
/// (user_id, entry_id), which is what makes at-least-once replay safe.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError>;
    /// Returns whether a row was actually deleted. Rotation relies on this:
    /// the loser of a concurrent refresh sees `false` and must not mint tokens.
    async fn delete_refresh_token(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn delete_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), StoreError>;

    /// Insert-or-overwrite on (user_id, id); clears any soft-delete mark.
    async fn upsert_entry(&self, entry: EntryUpsert) -> Result<(), StoreError>;
    /// Applies present fields and stamps `updated_at`; absent row is a no-op.
    async fn patch_entry(
        &self,
        user_id: Uuid,
        entry_id: &str,
        patch: EntryPatch,
        updated_at: OffsetDateTime,
    ) -> Result<(), StoreError>;
    /// Tombstones the row; absent or already-deleted row is a no-op.
    async fn soft_delete_entry(
        &self,
        user_id: Uuid,
        entry_id: &str,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;
    /// Non-deleted entries ordered by creation instant ascending, ties broken
    /// by insertion order.
    async fn list_entries(&self, user_id: Uuid) -> Result<Vec<BudgetEntry>, StoreError>;
}
