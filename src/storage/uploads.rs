use chrono::{DateTime, Utc};
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{OwnerRef, UploadRecord};
use super::tables::*;
use crate::object_store::StoreKind;

/// A metadata record removed from the database, plus what the caller needs
/// to decide whether the physical blob can go too.
#[derive(Debug)]
pub struct RemovedUpload {
    pub id: String,
    pub key: String,
    pub storage: StoreKind,
    /// True when other records still reference the same key. The blob must
    /// only be deleted when this is false.
    pub key_still_referenced: bool,
}

fn owner_index_key(owner: &OwnerRef, attr: &str) -> String {
    format!("{}/{}/{}", owner.owner_type, owner.owner_id, attr)
}

impl Database {
    // ========================================================================
    // Upload record operations
    // ========================================================================

    /// Store an upload record and update the key and owner indexes.
    pub fn put_upload(&self, record: &UploadRecord) -> Result<(), DatabaseError> {
        debug_assert!(!record.id.is_empty(), "record id must not be empty");
        debug_assert!(!record.key.is_empty(), "record key must not be empty");
        debug_assert!(
            record.temporary == record.owner.is_none(),
            "temporary records are unowned, permanent records are owned"
        );
        debug_assert!(
            record.temporary == record.expires_at.is_some(),
            "only temporary records carry an expiry"
        );

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(UPLOADS)?;
            let data = rmp_serde::to_vec_named(record)?;
            table.insert(record.id.as_str(), data.as_slice())?;
        }
        {
            let mut key_table = write_txn.open_table(UPLOAD_KEYS)?;
            let mut ids: Vec<String> = key_table
                .get(record.key.as_str())?
                .map(|v| rmp_serde::from_slice(v.value()).unwrap_or_default())
                .unwrap_or_default();
            if !ids.contains(&record.id) {
                ids.push(record.id.clone());
                let data = rmp_serde::to_vec_named(&ids)?;
                key_table.insert(record.key.as_str(), data.as_slice())?;
            }
        }
        if let Some(ref owner) = record.owner {
            let index_key = owner_index_key(owner, &record.attr);
            let mut owner_table = write_txn.open_table(OWNER_UPLOADS)?;
            let mut ids: Vec<String> = owner_table
                .get(index_key.as_str())?
                .map(|v| rmp_serde::from_slice(v.value()).unwrap_or_default())
                .unwrap_or_default();
            if !ids.contains(&record.id) {
                ids.push(record.id.clone());
                let data = rmp_serde::to_vec_named(&ids)?;
                owner_table.insert(index_key.as_str(), data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get an upload record by its UUID
    pub fn get_upload(&self, id: &str) -> Result<Option<UploadRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOADS)?;

        match table.get(id)? {
            Some(data) => {
                let record: UploadRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records owned by the given entity field, in insertion order.
    pub fn uploads_for_owner(
        &self,
        owner: &OwnerRef,
        attr: &str,
    ) -> Result<Vec<UploadRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let owner_table = read_txn.open_table(OWNER_UPLOADS)?;
        let uploads_table = read_txn.open_table(UPLOADS)?;

        let index_key = owner_index_key(owner, attr);
        let ids: Vec<String> = match owner_table.get(index_key.as_str())? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::new();
        for id in ids {
            if let Some(data) = uploads_table.get(id.as_str())? {
                let record: UploadRecord = rmp_serde::from_slice(data.value())?;
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Delete an upload record. The key-index reference count is resolved in
    /// the same write transaction as the delete, so two records sharing a key
    /// cannot both observe "no other references".
    pub fn delete_upload(&self, id: &str) -> Result<Option<RemovedUpload>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = remove_upload_in_txn(&write_txn, id)?;
        write_txn.commit()?;
        Ok(removed)
    }

    /// Promote a temporary record in place: assign the owner, clear the
    /// temporary flag and expiry. The record is mutated, never re-created,
    /// so its id and key survive. Returns false if the record is missing or
    /// not temporary.
    pub fn promote_upload(&self, id: &str, owner: &OwnerRef) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        // Copy the raw bytes out before the table (and its access guard)
        // is dropped.
        let raw = {
            let table = write_txn.open_table(UPLOADS)?;
            let raw = table.get(id)?.map(|data| data.value().to_vec());
            raw
        };
        let existing: Option<UploadRecord> = match raw {
            Some(bytes) => Some(rmp_serde::from_slice(&bytes)?),
            None => None,
        };

        let promoted = match existing {
            Some(mut record) if record.temporary => {
                record.owner = Some(owner.clone());
                record.temporary = false;
                record.expires_at = None;
                record.updated_at = Utc::now();

                {
                    let data = rmp_serde::to_vec_named(&record)?;
                    let mut table = write_txn.open_table(UPLOADS)?;
                    table.insert(id, data.as_slice())?;
                }
                {
                    let index_key = owner_index_key(owner, &record.attr);
                    let mut owner_table = write_txn.open_table(OWNER_UPLOADS)?;
                    let mut ids: Vec<String> = owner_table
                        .get(index_key.as_str())?
                        .map(|v| rmp_serde::from_slice(v.value()).unwrap_or_default())
                        .unwrap_or_default();
                    if !ids.contains(&record.id) {
                        ids.push(record.id.clone());
                        let data = rmp_serde::to_vec_named(&ids)?;
                        owner_table.insert(index_key.as_str(), data.as_slice())?;
                    }
                }
                true
            }
            _ => false,
        };

        write_txn.commit()?;
        Ok(promoted)
    }

    /// Delete every temporary record whose expiry has passed. Returns the
    /// removals so the caller can clean up unreferenced blobs.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<Vec<RemovedUpload>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let expired_ids: Vec<String> = {
            let table = write_txn.open_table(UPLOADS)?;
            let mut ids = Vec::new();
            for result in table.iter()? {
                let (_, value) = result?;
                let record: UploadRecord = rmp_serde::from_slice(value.value())?;
                if record.is_expired(now) {
                    ids.push(record.id);
                }
            }
            ids
        };

        let mut removed = Vec::new();
        for id in expired_ids {
            if let Some(r) = remove_upload_in_txn(&write_txn, &id)? {
                removed.push(r);
            }
        }

        write_txn.commit()?;
        Ok(removed)
    }

    /// Total number of upload records (temporary and permanent).
    pub fn count_uploads(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOADS)?;
        Ok(table.len()?)
    }

    /// Whether any record references the given content key.
    pub fn key_referenced(&self, key: &str) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(UPLOAD_KEYS)?;
        Ok(table.get(key)?.is_some())
    }
}

fn remove_upload_in_txn(
    write_txn: &WriteTransaction,
    id: &str,
) -> Result<Option<RemovedUpload>, DatabaseError> {
    let raw = {
        let table = write_txn.open_table(UPLOADS)?;
        let raw = table.get(id)?.map(|data| data.value().to_vec());
        raw
    };
    let Some(bytes) = raw else {
        return Ok(None);
    };
    let record: UploadRecord = rmp_serde::from_slice(&bytes)?;

    {
        let mut table = write_txn.open_table(UPLOADS)?;
        table.remove(id)?;
    }

    // Key index: drop this id, keeping the entry while other records share
    // the key.
    let key_still_referenced = {
        let raw = {
            let key_table = write_txn.open_table(UPLOAD_KEYS)?;
            let raw = key_table
                .get(record.key.as_str())?
                .map(|data| data.value().to_vec());
            raw
        };
        let mut ids: Vec<String> = match raw {
            Some(bytes) => rmp_serde::from_slice(&bytes)?,
            None => Vec::new(),
        };
        ids.retain(|existing| existing != id);

        let mut key_table = write_txn.open_table(UPLOAD_KEYS)?;
        if ids.is_empty() {
            key_table.remove(record.key.as_str())?;
            false
        } else {
            let data = rmp_serde::to_vec_named(&ids)?;
            key_table.insert(record.key.as_str(), data.as_slice())?;
            true
        }
    };

    // Owner index
    if let Some(ref owner) = record.owner {
        let index_key = owner_index_key(owner, &record.attr);
        let raw = {
            let owner_table = write_txn.open_table(OWNER_UPLOADS)?;
            let raw = owner_table
                .get(index_key.as_str())?
                .map(|data| data.value().to_vec());
            raw
        };
        let ids: Option<Vec<String>> = match raw {
            Some(bytes) => Some(rmp_serde::from_slice(&bytes)?),
            None => None,
        };

        if let Some(mut ids) = ids {
            ids.retain(|existing| existing != id);
            let mut owner_table = write_txn.open_table(OWNER_UPLOADS)?;
            if ids.is_empty() {
                owner_table.remove(index_key.as_str())?;
            } else {
                let data = rmp_serde::to_vec_named(&ids)?;
                owner_table.insert(index_key.as_str(), data.as_slice())?;
            }
        }
    }

    Ok(Some(RemovedUpload {
        id: id.to_string(),
        key: record.key,
        storage: record.storage,
        key_still_referenced,
    }))
}
