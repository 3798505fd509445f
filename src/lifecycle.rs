//! The upload lifecycle coordinator.
//!
//! Orchestrates, per upload field per save attempt, whether to write
//! temporary metadata, promote a remembered temporary record, replace a
//! permanent record, or leave state untouched. The save pipeline is explicit
//! (validate -> temp-write stage -> transactional persist -> permanent-write
//! or promote stage), with per-attempt state carried in a [`SaveAttempt`]
//! context rather than flags on the entity.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::field::{FieldDescriptor, TempRef, TempWritePolicy, UploadField};
use crate::mapper::Mapper;
use crate::object_store::{
    LocalStore, S3Store, StoreError, StoreKind, StoreRegistry, UrlOptions,
};
use crate::storage::{Database, DatabaseError, OwnerRef, UploadRecord};
use crate::token;
use crate::upload::Upload;
use crate::validation::{FieldErrors, UploadRules};

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A malformed upload was passed where a real one was expected.
    /// Programmer error, not retried.
    #[error("Invalid upload: {0}")]
    InvalidArgument(String),
    #[error("Transform for '{0}' produced no output")]
    TransformFailed(&'static str),
    #[error("Persistence failed: {0}")]
    Persistence(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The owning-entity collaborator.
///
/// Implementors bring their own persistence: [`UploadOwner::persist`] is the
/// transactional save primitive, returning `Ok(false)` on a rolled-back
/// attempt (constraint violations and the like) and assigning the owner id
/// on first success. Validation errors are collected separately by
/// [`UploadOwner::validate`], which the coordinator consults before
/// persisting at all.
#[async_trait]
pub trait UploadOwner: Send {
    fn owner_type(&self) -> &'static str;

    /// Stable id of the entity; None until the first successful persist.
    fn owner_id(&self) -> Option<String>;

    fn validate(&self) -> FieldErrors;

    fn upload_fields(&mut self) -> Vec<&mut UploadField>;

    /// Attempt the transactional save of the entity itself.
    async fn persist(&mut self) -> Result<bool, LifecycleError>;
}

/// Per-attempt guard state. A transition fires at most once per field per
/// externally-initiated attempt, even when persistence nests.
#[derive(Default)]
pub struct SaveAttempt {
    handled: HashSet<&'static str>,
}

impl SaveAttempt {
    /// Returns true the first time an attribute is seen this attempt.
    fn mark(&mut self, attr: &'static str) -> bool {
        self.handled.insert(attr)
    }
}

/// The coordinator itself: metadata database, store registry, and the
/// app-level configuration they share.
pub struct Lifecycle {
    db: Database,
    stores: StoreRegistry,
    config: Config,
}

impl Lifecycle {
    pub fn new(db: Database, stores: StoreRegistry, config: Config) -> Self {
        Self { db, stores, config }
    }

    /// Build a coordinator from configuration: opens the metadata database
    /// and registers the configured stores (local always, S3 when a bucket
    /// is configured).
    pub fn from_config(config: Config) -> Result<Self, LifecycleError> {
        let db = Database::open(&config.data_dir)?;

        let mut stores = StoreRegistry::new();
        stores.register(Arc::new(LocalStore::new(
            &config.storage.local_root,
            &config.environment,
        )));
        if config.storage.s3.bucket.is_some() {
            stores.register(Arc::new(S3Store::new(
                &config.storage.s3,
                &config.environment,
            )?));
        }

        Ok(Self::new(db, stores, config))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A field descriptor seeded from this coordinator's configuration:
    /// default storage backend, temporary-record lifetime, and temp-write
    /// policy. Callers chain further overrides onto the result.
    pub fn descriptor(&self, attr: &'static str) -> FieldDescriptor {
        FieldDescriptor::new(attr)
            .storage(self.config.storage.backend)
            .expires_in(Duration::seconds(self.config.default_expiry_secs as i64))
            .temp_write(self.config.default_temp_write)
    }

    /// Baseline validation rules carrying the configured global size cap.
    pub fn default_rules(&self) -> UploadRules {
        UploadRules {
            max_size: Some(self.config.max_upload_size),
            ..UploadRules::default()
        }
    }

    // ========================================================================
    // Save pipeline entry points
    // ========================================================================

    /// Run one save attempt: validate, persist, then write or promote upload
    /// metadata according to the outcome. Returns the persist outcome.
    pub async fn save<O: UploadOwner>(&self, owner: &mut O) -> Result<bool, LifecycleError> {
        let mut attempt = SaveAttempt::default();
        self.run_attempt(owner, &mut attempt).await
    }

    /// Apply attribute changes, then run a save attempt. Mirrors an "update"
    /// persistence call that internally delegates to save; both share one
    /// attempt context so no field transition can fire twice.
    pub async fn update<O, F>(&self, owner: &mut O, apply: F) -> Result<bool, LifecycleError>
    where
        O: UploadOwner,
        F: FnOnce(&mut O) + Send,
    {
        apply(owner);
        let mut attempt = SaveAttempt::default();
        self.run_attempt(owner, &mut attempt).await
    }

    /// Validation-only entry point: runs the owner's validation and the
    /// immediate temp-write stage for fields configured with
    /// [`TempWritePolicy::OnValidation`], without attempting a save.
    pub async fn validate_only<O: UploadOwner>(
        &self,
        owner: &mut O,
    ) -> Result<FieldErrors, LifecycleError> {
        let errors = owner.validate();
        let mut attempt = SaveAttempt::default();
        self.temp_write_stage(owner, &mut attempt, &errors, &[TempWritePolicy::OnValidation])
            .await?;
        Ok(errors)
    }

    async fn run_attempt<O: UploadOwner>(
        &self,
        owner: &mut O,
        attempt: &mut SaveAttempt,
    ) -> Result<bool, LifecycleError> {
        let errors = owner.validate();
        let owner_type = owner.owner_type();

        if !errors.is_empty() {
            // The save attempt fails at validation; no transaction runs.
            // Both trigger policies write their temporary metadata here.
            self.temp_write_stage(
                owner,
                attempt,
                &errors,
                &[TempWritePolicy::OnRollback, TempWritePolicy::OnValidation],
            )
            .await?;
            return Ok(false);
        }

        let success = owner.persist().await?;

        if success {
            let owner_id = owner.owner_id().ok_or_else(|| {
                LifecycleError::InvalidArgument(
                    "owner id not assigned after successful persist".to_string(),
                )
            })?;
            let owner_ref = OwnerRef::new(owner_type, owner_id);

            for field in owner.upload_fields() {
                if !attempt.mark(field.attr()) {
                    continue;
                }
                if field.has_pending() {
                    self.write_permanent(field, &owner_ref).await?;
                } else if !field.remembered().is_empty() {
                    self.promote(field, &owner_ref).await?;
                }
            }
        } else {
            // The transaction rolled back; any metadata written inside it is
            // gone. Both trigger policies write their temp records now,
            // outside the transaction. The policy picks when the write
            // happens, never whether a rolled-back upload is kept.
            self.temp_write_stage(
                owner,
                attempt,
                &errors,
                &[TempWritePolicy::OnRollback, TempWritePolicy::OnValidation],
            )
            .await?;
        }

        Ok(success)
    }

    /// Write temporary metadata for fields whose policy matches, whose
    /// upload is itself valid, and which have not already remembered refs
    /// from an earlier attempt.
    async fn temp_write_stage<O: UploadOwner>(
        &self,
        owner: &mut O,
        attempt: &mut SaveAttempt,
        errors: &FieldErrors,
        policies: &[TempWritePolicy],
    ) -> Result<(), LifecycleError> {
        for field in owner.upload_fields() {
            let policy = field.descriptor().temp_write;
            if !policies.contains(&policy) {
                continue;
            }
            if !field.has_pending()
                || !field.remembered().is_empty()
                || !errors.on(field.attr()).is_empty()
            {
                continue;
            }
            if !attempt.mark(field.attr()) {
                continue;
            }
            self.write_temporary(field).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// TempPersisted: persist the pending upload as unowned temporary
    /// record(s) and remember their refs for the round-trip token. The
    /// pending upload stays on the field so a later successful save can
    /// still write it permanently.
    async fn write_temporary(&self, field: &mut UploadField) -> Result<(), LifecycleError> {
        let expires_at = Utc::now() + field.descriptor().expires_in;
        let records = self.persist_upload_set(field, None, Some(expires_at)).await?;

        let refs = records
            .iter()
            .map(|r| TempRef {
                id: r.id.clone(),
                key: r.key.clone(),
            })
            .collect();
        field.set_remembered(refs);

        debug!(attr = field.attr(), "Wrote temporary upload metadata");
        Ok(())
    }

    /// PermanentPersisted: persist the pending upload (or its transform
    /// variants) as permanent record(s) owned by the saved entity, then
    /// destroy the superseded prior records.
    async fn write_permanent(
        &self,
        field: &mut UploadField,
        owner: &OwnerRef,
    ) -> Result<(), LifecycleError> {
        let superseded = self.db.uploads_for_owner(owner, field.attr())?;

        // New records land before the old ones go away, so a transform or
        // store failure here leaves the previous upload untouched.
        let records = self
            .persist_upload_set(field, Some(owner.clone()), None)
            .await?;

        for record in superseded {
            self.destroy_record(&record.id).await?;
        }

        field.take_pending();
        field.clear_remembered();
        field.set_persisted(records.iter().map(|r| r.id.clone()).collect());

        debug!(
            attr = field.attr(),
            owner_type = %owner.owner_type,
            owner_id = %owner.owner_id,
            records = records.len(),
            "Wrote permanent upload metadata"
        );
        Ok(())
    }

    /// TempPromoted: the save succeeded with no new upload, but remembered
    /// temp refs exist. Flip the temp records in place, then destroy the
    /// superseded permanent records. No blob rewrite -- the content is
    /// already stored under its key.
    async fn promote(
        &self,
        field: &mut UploadField,
        owner: &OwnerRef,
    ) -> Result<(), LifecycleError> {
        let superseded = self.db.uploads_for_owner(owner, field.attr())?;

        let mut promoted = Vec::new();
        for temp_ref in field.remembered().to_vec() {
            // promote_upload re-checks the temporary flag under the write
            // transaction; stale refs just fall out.
            if self.db.promote_upload(&temp_ref.id, owner)? {
                promoted.push(temp_ref.id);
            }
        }

        for record in superseded {
            self.destroy_record(&record.id).await?;
        }

        field.clear_remembered();
        field.set_persisted(promoted);

        debug!(
            attr = field.attr(),
            owner_type = %owner.owner_type,
            owner_id = %owner.owner_id,
            "Promoted temporary upload metadata"
        );
        Ok(())
    }

    // ========================================================================
    // Record persistence
    // ========================================================================

    /// Persist the field's pending upload, running the transform pipeline
    /// when one is configured. Returns the records written, in variant
    /// order (first = primary).
    async fn persist_upload_set(
        &self,
        field: &mut UploadField,
        owner: Option<OwnerRef>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<UploadRecord>, LifecycleError> {
        let descriptor = Arc::clone(field.descriptor());
        let upload = field.pending_mut().ok_or_else(|| {
            LifecycleError::InvalidArgument("no pending upload on field".to_string())
        })?;

        let mut records = Vec::new();

        if let Some(ref transform) = descriptor.transform {
            let mut mapper = Mapper::new(&self.config.scratch_dir);
            transform.apply(upload, &mut mapper).await?;
            let mut variants = mapper.into_outputs();

            if variants.is_empty() {
                if descriptor.strict_transform {
                    return Err(LifecycleError::TransformFailed(descriptor.attr));
                }
                return Ok(records);
            }

            // Single-valued fields keep only the primary variant; extra
            // outputs are discarded unpersisted.
            if !descriptor.multiple && variants.len() > 1 {
                for extra in variants.split_off(1) {
                    extra.discard().await;
                }
            }

            for variant in variants {
                let mut derived = variant.open().await?;
                let record = self
                    .persist_record(&mut derived, &descriptor, owner.clone(), expires_at)
                    .await;
                variant.discard().await;
                records.push(record?);
            }
        } else {
            let record = self
                .persist_record(upload, &descriptor, owner, expires_at)
                .await?;
            records.push(record);
        }

        Ok(records)
    }

    /// Persist one upload: compute its key, capture descriptive metadata,
    /// save the record, then write the blob. The metadata write comes
    /// first; a crash in between leaves a record pointing at a missing
    /// blob, which is the accepted failure mode.
    async fn persist_record(
        &self,
        upload: &mut Upload,
        descriptor: &FieldDescriptor,
        owner: Option<OwnerRef>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<UploadRecord, LifecycleError> {
        if upload.original_filename().is_empty() {
            return Err(LifecycleError::InvalidArgument(
                "upload has no original filename".to_string(),
            ));
        }

        let key = descriptor.key_fn.compute(upload.source_mut()).await?;
        let (original_basename, original_extension) = upload.filename_parts();
        let mime_type = mime_guess::from_path(upload.original_filename())
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();

        let now = Utc::now();
        let record = UploadRecord {
            id: uuid::Uuid::new_v4().to_string(),
            temporary: owner.is_none(),
            owner,
            attr: descriptor.attr.to_string(),
            storage: descriptor.storage,
            key: key.clone(),
            original_basename,
            original_extension,
            mime_type,
            byte_size: upload.byte_size(),
            expires_at,
            created_at: now,
            updated_at: now,
        };

        self.db.put_upload(&record)?;

        let store = self.stores.get(descriptor.storage)?;
        store.write(&key, upload.source_mut()).await?;

        if self.config.prune_on_upload {
            self.prune_expired().await?;
        }

        Ok(record)
    }

    /// Destroy a metadata record; physically delete the blob only when no
    /// other record references its key. The blob delete is best-effort.
    pub async fn destroy_record(&self, id: &str) -> Result<(), LifecycleError> {
        let Some(removed) = self.db.delete_upload(id)? else {
            return Ok(());
        };

        if !removed.key_still_referenced {
            self.delete_blob(removed.storage, &removed.key).await;
        }
        Ok(())
    }

    /// Delete all metadata records whose expiry has passed, and any blobs
    /// they were the last reference to. Piggybacked on writes; callers may
    /// also invoke it directly.
    pub async fn prune_expired(&self) -> Result<(), LifecycleError> {
        let removed = self.db.prune_expired(Utc::now())?;
        if removed.is_empty() {
            return Ok(());
        }

        debug!(count = removed.len(), "Pruned expired temporary uploads");
        for entry in removed {
            if !entry.key_still_referenced {
                self.delete_blob(entry.storage, &entry.key).await;
            }
        }
        Ok(())
    }

    async fn delete_blob(&self, kind: StoreKind, key: &str) {
        match self.stores.get(kind) {
            Ok(store) => {
                if let Err(e) = store.delete(key).await {
                    warn!(key = %key, error = %e, "Failed to delete blob from storage");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "No store available for blob deletion"),
        }
    }

    /// Destroy every upload owned by an entity, for the named attributes.
    /// Call when the owning entity itself is deleted.
    pub async fn destroy_uploads(
        &self,
        owner: &OwnerRef,
        attrs: &[&str],
    ) -> Result<(), LifecycleError> {
        for attr in attrs {
            let records = self.db.uploads_for_owner(owner, attr)?;
            for record in records {
                self.destroy_record(&record.id).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Round-trip token
    // ========================================================================

    /// Encode the remembered temp references of all fields into the token
    /// carried by a redisplayed form. None when nothing is remembered.
    pub fn round_trip_token<O: UploadOwner>(&self, owner: &mut O) -> Option<String> {
        let mut refs: BTreeMap<String, Vec<TempRef>> = BTreeMap::new();
        for field in owner.upload_fields() {
            if !field.remembered().is_empty() {
                refs.insert(field.attr().to_string(), field.remembered().to_vec());
            }
        }
        if refs.is_empty() {
            None
        } else {
            Some(token::encode(&refs))
        }
    }

    /// Decode a submitted token and attach the surviving references to the
    /// owner's fields. References that fail re-validation are dropped.
    pub fn apply_token<O: UploadOwner>(
        &self,
        owner: &mut O,
        token: &str,
    ) -> Result<(), LifecycleError> {
        let refs = token::decode(&self.db, token)?;
        for field in owner.upload_fields() {
            if let Some(valid) = refs.get(field.attr()) {
                field.set_remembered(valid.clone());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Read-side helpers
    // ========================================================================

    /// All permanent metadata for an owner's attribute, in insertion order.
    pub fn metadata(&self, owner: &OwnerRef, attr: &str) -> Result<Vec<UploadRecord>, LifecycleError> {
        Ok(self.db.uploads_for_owner(owner, attr)?)
    }

    /// The primary (first) record for a single-valued field.
    pub fn primary_metadata(
        &self,
        owner: &OwnerRef,
        attr: &str,
    ) -> Result<Option<UploadRecord>, LifecycleError> {
        Ok(self.db.uploads_for_owner(owner, attr)?.into_iter().next())
    }

    /// Filesystem path of a record's blob, for path-capable stores.
    pub fn blob_path(&self, record: &UploadRecord) -> Result<PathBuf, LifecycleError> {
        Ok(self.stores.get(record.storage)?.path(&record.key)?)
    }

    /// Read a record's blob content.
    pub async fn read_blob(&self, record: &UploadRecord) -> Result<Bytes, LifecycleError> {
        Ok(self.stores.get(record.storage)?.read(&record.key).await?)
    }

    /// Time-limited signed URL for a record's blob, for URL-capable stores.
    pub async fn signed_url(
        &self,
        record: &UploadRecord,
        options: UrlOptions,
    ) -> Result<String, LifecycleError> {
        Ok(self
            .stores
            .get(record.storage)?
            .url(&record.key, options)
            .await?)
    }
}
