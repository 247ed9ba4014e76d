use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    BudgetEntry, EntryPatch, EntryUpsert, RefreshToken, Store, StoreError, User,
};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    tokens: Vec<RefreshToken>,
    // Vec keeps insertion order, which is the tie-break for equal created_at.
    entries: Vec<BudgetEntry>,
}

/// In-memory store backing `AppState::fake()` and the test suite. Same
/// contract as `PgStore`; the mutex is only held across synchronous work.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|u| u.email == email) {
            return Err(StoreError::Conflict);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens.push(RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn delete_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.tokens.len();
        inner.tokens.retain(|t| t.id != id);
        Ok(inner.tokens.len() < before)
    }

    async fn delete_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tokens.retain(|t| t.token_hash != token_hash);
        Ok(())
    }

    async fn upsert_entry(&self, entry: EntryUpsert) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .entries
            .iter_mut()
            .find(|e| e.user_id == entry.user_id && e.id == entry.id)
        {
            existing.amount = entry.amount;
            existing.description = entry.description;
            existing.kind = entry.kind;
            existing.updated_at = entry.updated_at;
            existing.deleted_at = None;
        } else {
            inner.entries.push(BudgetEntry {
                id: entry.id,
                user_id: entry.user_id,
                amount: entry.amount,
                description: entry.description,
                kind: entry.kind,
                created_at: entry.created_at,
                updated_at: entry.updated_at,
                deleted_at: None,
            });
        }
        Ok(())
    }

    async fn patch_entry(
        &self,
        user_id: Uuid,
        entry_id: &str,
        patch: EntryPatch,
        updated_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.user_id == user_id && e.id == entry_id)
        {
            if let Some(amount) = patch.amount {
                entry.amount = amount;
            }
            if let Some(description) = patch.description {
                entry.description = description;
            }
            if let Some(kind) = patch.kind {
                entry.kind = kind;
            }
            entry.updated_at = updated_at;
        }
        Ok(())
    }

    async fn soft_delete_entry(
        &self,
        user_id: Uuid,
        entry_id: &str,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.user_id == user_id && e.id == entry_id && e.deleted_at.is_none())
        {
            entry.deleted_at = Some(at);
            entry.updated_at = at;
        }
        Ok(())
    }

    async fn list_entries(&self, user_id: Uuid) -> Result<Vec<BudgetEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<BudgetEntry> = inner
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && e.deleted_at.is_none())
            .cloned()
            .collect();
        // Stable sort preserves insertion order for equal timestamps.
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}
