use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ApiError;
use crate::store::EntryKind;

const MAX_ENTRY_ID_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_AMOUNT: u64 = 999_999_999_999;

/// The unit of replay from the client's offline queue.
#[derive(Debug, Deserialize)]
pub struct SyncOperation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub payload: SyncPayload,
    /// Client-side queue ordering only; never used for conflict resolution.
    #[allow(dead_code)]
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub entry_id: String,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub entry_type: Option<EntryKind>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl SyncOperation {
    /// Field-shape validation shared by all operation kinds; kind-specific
    /// requirements (add needs amount + entryType) live in the service.
    pub fn validate(&self) -> Result<(), ApiError> {
        let p = &self.payload;
        if p.entry_id.is_empty() || p.entry_id.len() > MAX_ENTRY_ID_LEN {
            return Err(ApiError::Validation(
                "entryId must be between 1 and 100 characters".into(),
            ));
        }
        if let Some(amount) = p.amount {
            if amount <= Decimal::ZERO || amount > Decimal::from(MAX_AMOUNT) {
                return Err(ApiError::Validation("amount out of range".into()));
            }
        }
        if let Some(description) = &p.description {
            if description.len() > MAX_DESCRIPTION_LEN {
                return Err(ApiError::Validation(
                    "description must be at most 500 characters".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Wire shape of one entry in the snapshot. Amounts serialize as exact
/// decimal JSON numbers, not binary floats.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub id: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<EntryResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(json: &str) -> SyncOperation {
        serde_json::from_str(json).expect("valid operation json")
    }

    #[test]
    fn parses_add_operation() {
        let op = op(
            r#"{"type":"add","payload":{"entryId":"e1","amount":50.25,"entryType":"expense","createdAt":"2026-01-02T03:04:05Z"},"timestamp":1}"#,
        );
        assert_eq!(op.kind, OperationKind::Add);
        assert_eq!(op.payload.amount.unwrap().to_string(), "50.25");
        assert_eq!(op.payload.entry_type, Some(EntryKind::Expense));
        assert!(op.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_amount() {
        let negative =
            op(r#"{"type":"add","payload":{"entryId":"e1","amount":-1,"entryType":"income"}}"#);
        assert!(negative.validate().is_err());

        let huge = op(
            r#"{"type":"add","payload":{"entryId":"e1","amount":1000000000000,"entryType":"income"}}"#,
        );
        assert!(huge.validate().is_err());
    }

    #[test]
    fn rejects_bad_entry_id_and_long_description() {
        let empty = op(r#"{"type":"delete","payload":{"entryId":""}}"#);
        assert!(empty.validate().is_err());

        let long = "x".repeat(501);
        let op = op(&format!(
            r#"{{"type":"update","payload":{{"entryId":"e1","description":"{long}"}}}}"#
        ));
        assert!(op.validate().is_err());
    }

    #[test]
    fn amount_survives_as_exact_decimal() {
        let resp = EntryResponse {
            id: "e1".into(),
            amount: "0.10".parse().unwrap(),
            description: String::new(),
            kind: EntryKind::Expense,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""amount":0.10"#), "got: {json}");
        assert!(json.contains(r#""type":"expense""#));
    }
}
