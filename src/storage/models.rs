use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object_store::StoreKind;

/// Polymorphic back-reference to the entity a permanent upload belongs to.
/// Lookup only -- the record's lifecycle is driven by the coordinator, not
/// by the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub owner_type: String,
    pub owner_id: String,
}

impl OwnerRef {
    pub fn new(owner_type: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
        }
    }
}

/// One stored blob's metadata.
///
/// Invariants:
/// - permanent (`temporary == false`): `owner` is set, `expires_at` is None.
/// - temporary: `owner` is None, `expires_at` is set.
/// - several records may share a `key`; the blob is deleted only when the
///   last record referencing that key is destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: String,
    pub owner: Option<OwnerRef>,
    /// The owning entity's attribute this upload was submitted for.
    pub attr: String,
    /// Which backend wrote the blob.
    pub storage: StoreKind,
    /// Content-derived identifier, stable across re-uploads of identical bytes.
    pub key: String,
    pub original_basename: String,
    pub original_extension: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub temporary: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    /// Filename as uploaded, reassembled from its stored parts.
    pub fn original_filename(&self) -> String {
        format!("{}{}", self.original_basename, self.original_extension)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.temporary && self.expires_at.map(|at| at < now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(temporary: bool, expires_at: Option<DateTime<Utc>>) -> UploadRecord {
        let now = Utc::now();
        UploadRecord {
            id: "r1".to_string(),
            owner: None,
            attr: "manual".to_string(),
            storage: StoreKind::Local,
            key: "abc".to_string(),
            original_basename: "manual".to_string(),
            original_extension: ".pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            byte_size: 10,
            temporary,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_original_filename() {
        assert_eq!(record(false, None).original_filename(), "manual.pdf");
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        assert!(record(true, Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!record(true, Some(now + Duration::hours(1))).is_expired(now));
        // Permanent records never expire.
        assert!(!record(false, Some(now - Duration::seconds(1))).is_expired(now));
    }
}
