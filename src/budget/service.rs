use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::dto::{OperationKind, SyncOperation};
use crate::error::ApiError;
use crate::store::{EntryPatch, EntryUpsert, Store};

/// Applies one replayed operation. Every mutation is a single atomic store
/// call scoped by (user_id, entry_id), so replaying the same operation any
/// number of times converges on the same row, and one user's operations can
/// never touch another user's entries — a wrong-owner request is
/// indistinguishable from a missing-entry request.
pub async fn apply_operation(
    store: &dyn Store,
    user_id: Uuid,
    op: SyncOperation,
) -> Result<(), ApiError> {
    op.validate()?;
    let now = OffsetDateTime::now_utc();
    let payload = op.payload;

    match op.kind {
        OperationKind::Add => {
            let (Some(amount), Some(kind)) = (payload.amount, payload.entry_type) else {
                return Err(ApiError::Validation(
                    "amount and entryType are required for add operations".into(),
                ));
            };
            // Upsert resurrects a tombstoned row: the client queue may replay
            // an add after an out-of-order delete, and add wins.
            store
                .upsert_entry(EntryUpsert {
                    id: payload.entry_id,
                    user_id,
                    amount,
                    description: payload.description.unwrap_or_default(),
                    kind,
                    created_at: payload.created_at.unwrap_or(now),
                    updated_at: now,
                })
                .await?;
        }
        OperationKind::Update => {
            // Absent target is a silent no-op: the entry may have been
            // deleted by an earlier replay, and failing would wedge the queue.
            store
                .patch_entry(
                    user_id,
                    &payload.entry_id,
                    EntryPatch {
                        amount: payload.amount,
                        description: payload.description,
                        kind: payload.entry_type,
                    },
                    now,
                )
                .await?;
        }
        OperationKind::Delete => {
            store
                .soft_delete_entry(user_id, &payload.entry_id, now)
                .await?;
        }
    }

    debug!(%user_id, "sync operation applied");
    Ok(())
}
