use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    BudgetEntry, EntryKind, EntryPatch, EntryUpsert, RefreshToken, Store, StoreError, User,
};

/// sqlx-backed store. Each method is a single statement, so concurrent
/// replays of the same operation cannot interleave into a half-written row.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict;
        }
    }
    StoreError::Unavailable(err.to_string())
}

fn user_from_row(row: PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn refresh_token_from_row(row: PgRow) -> Result<RefreshToken, sqlx::Error> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entry_from_row(row: PgRow) -> Result<BudgetEntry, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let kind = EntryKind::parse(&kind).ok_or_else(|| sqlx::Error::Decode(
        format!("unknown entry kind: {kind}").into(),
    ))?;
    Ok(BudgetEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        description: row.try_get("description")?,
        kind,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING id, email, password_hash, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_err)?;
        user_from_row(row).map_err(map_err)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)?;
        row.map(user_from_row).transpose().map_err(map_err)
    }

    async fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.db)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, token_hash, expires_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(map_err)?;
        row.map(refresh_token_from_row).transpose().map_err(map_err)
    }

    async fn delete_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_refresh_token_by_hash(&self, token_hash: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.db)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn upsert_entry(&self, entry: EntryUpsert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO budget_entries
                (id, user_id, amount, description, kind, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL)
            ON CONFLICT (user_id, id) DO UPDATE SET
                amount = EXCLUDED.amount,
                description = EXCLUDED.description,
                kind = EXCLUDED.kind,
                updated_at = EXCLUDED.updated_at,
                deleted_at = NULL
            "#,
        )
        .bind(&entry.id)
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(&entry.description)
        .bind(entry.kind.as_str())
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.db)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn patch_entry(
        &self,
        user_id: Uuid,
        entry_id: &str,
        patch: EntryPatch,
        updated_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE budget_entries SET
                amount = COALESCE($3, amount),
                description = COALESCE($4, description),
                kind = COALESCE($5, kind),
                updated_at = $6
            WHERE user_id = $1 AND id = $2
            "#,
        )
        .bind(user_id)
        .bind(entry_id)
        .bind(patch.amount)
        .bind(patch.description)
        .bind(patch.kind.map(|k| k.as_str()))
        .bind(updated_at)
        .execute(&self.db)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn soft_delete_entry(
        &self,
        user_id: Uuid,
        entry_id: &str,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE budget_entries
            SET deleted_at = $3, updated_at = $3
            WHERE user_id = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(entry_id)
        .bind(at)
        .execute(&self.db)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn list_entries(&self, user_id: Uuid) -> Result<Vec<BudgetEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount, description, kind, created_at, updated_at, deleted_at
            FROM budget_entries
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .map_err(map_err)?;
        rows.into_iter()
            .map(entry_from_row)
            .collect::<Result<_, _>>()
            .map_err(map_err)
    }
}
