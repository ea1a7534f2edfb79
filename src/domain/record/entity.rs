//! Record entity - a JSON document addressed by a string id

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cache::{CacheEntity, CacheId};
use crate::domain::DomainError;

const MAX_ID_LENGTH: usize = 255;

/// Record identifier - non-empty, at most 255 characters, no whitespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Create a new RecordId after validation
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();

        if id.is_empty() {
            return Err(DomainError::validation("Record id cannot be empty"));
        }

        if id.len() > MAX_ID_LENGTH {
            return Err(DomainError::validation(format!(
                "Record id exceeds {} characters",
                MAX_ID_LENGTH
            )));
        }

        if id.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "Record id '{}' cannot contain whitespace",
                id
            )));
        }

        Ok(Self(id))
    }

    /// Generates a random UUID-based id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl CacheId for RecordId {
    fn key_segment(&self) -> String {
        self.0.clone()
    }
}

/// A schemaless document persisted by the backing store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: RecordId, data: serde_json::Value) -> Self {
        Self {
            id,
            data,
            updated_at: Utc::now(),
        }
    }
}

impl CacheEntity for Record {
    type Id = RecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_record_id() {
        let id = RecordId::new("user-42").unwrap();
        assert_eq!(id.as_str(), "user-42");
        assert_eq!(id.key_segment(), "user-42");
    }

    #[test]
    fn test_invalid_record_ids() {
        assert!(RecordId::new("").is_err());
        assert!(RecordId::new("has space").is_err());
        assert!(RecordId::new("x".repeat(256)).is_err());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }

    #[test]
    fn test_record_serde_rejects_bad_id() {
        let json = r#"{"id":"","data":{},"updated_at":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Record>(json).is_err());
    }

    #[test]
    fn test_record_round_trip_keeps_data() {
        let record = Record::new(RecordId::new("a").unwrap(), serde_json::json!({"n": 1}));
        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
