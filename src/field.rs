//! Per-attribute upload configuration and per-instance field state.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::key::{KeyFunction, Sha512Key};
use crate::mapper::Transform;
use crate::object_store::StoreKind;
use crate::upload::Upload;

/// When a failed save attempt writes temporary metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempWritePolicy {
    /// Write after the owner's transactional save has failed and rolled
    /// back. The write happens outside the transaction, so it survives the
    /// rollback. This is the default.
    OnRollback,
    /// Write synchronously right after validation, before any transactional
    /// save is attempted. Makes the temp file available to validation-only
    /// calls that never reach the save step.
    OnValidation,
    /// Never write temporary metadata for this field.
    Disabled,
}

/// Configuration for one upload attribute of an entity type. Immutable once
/// declared; shared across all instances of the type.
pub struct FieldDescriptor {
    pub attr: &'static str,
    pub key_fn: Arc<dyn KeyFunction>,
    pub storage: StoreKind,
    /// Lifetime of temporary records written for this field.
    pub expires_in: Duration,
    pub transform: Option<Arc<dyn Transform>>,
    /// Whether all transform variants are exposed, or only the first.
    pub multiple: bool,
    pub temp_write: TempWritePolicy,
    /// Raise when a configured transform produces no output.
    pub strict_transform: bool,
}

impl FieldDescriptor {
    pub fn new(attr: &'static str) -> Self {
        Self {
            attr,
            key_fn: Arc::new(Sha512Key),
            storage: StoreKind::Local,
            expires_in: Duration::days(1),
            transform: None,
            multiple: false,
            temp_write: TempWritePolicy::OnRollback,
            strict_transform: true,
        }
    }

    pub fn key_fn(mut self, key_fn: Arc<dyn KeyFunction>) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn storage(mut self, storage: StoreKind) -> Self {
        self.storage = storage;
        self
    }

    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = transform.into();
        self
    }

    pub fn multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    pub fn temp_write(mut self, policy: TempWritePolicy) -> Self {
        self.temp_write = policy;
        self
    }

    pub fn strict_transform(mut self, strict: bool) -> Self {
        self.strict_transform = strict;
        self
    }
}

/// A remembered reference to a temporary metadata record, round-tripped
/// through the form token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempRef {
    pub id: String,
    pub key: String,
}

/// Per-instance state of one upload attribute across a save cycle.
pub struct UploadField {
    descriptor: Arc<FieldDescriptor>,
    /// A raw upload set on the field this cycle, not yet persisted.
    pending: Option<Upload>,
    /// Temporary records remembered from a prior failed attempt.
    remembered: Vec<TempRef>,
    /// Permanent record ids after a successful save; first is primary.
    persisted: Vec<String>,
}

impl UploadField {
    pub fn new(descriptor: FieldDescriptor) -> Self {
        Self::with_descriptor(Arc::new(descriptor))
    }

    pub fn with_descriptor(descriptor: Arc<FieldDescriptor>) -> Self {
        Self {
            descriptor,
            pending: None,
            remembered: Vec::new(),
            persisted: Vec::new(),
        }
    }

    pub fn attr(&self) -> &'static str {
        self.descriptor.attr
    }

    pub fn descriptor(&self) -> &Arc<FieldDescriptor> {
        &self.descriptor
    }

    /// Assign a new raw upload for this cycle.
    pub fn set(&mut self, upload: Upload) {
        self.pending = Some(upload);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&Upload> {
        self.pending.as_ref()
    }

    pub(crate) fn pending_mut(&mut self) -> Option<&mut Upload> {
        self.pending.as_mut()
    }

    pub(crate) fn take_pending(&mut self) -> Option<Upload> {
        self.pending.take()
    }

    pub fn remembered(&self) -> &[TempRef] {
        &self.remembered
    }

    pub fn set_remembered(&mut self, refs: Vec<TempRef>) {
        self.remembered = refs;
    }

    pub(crate) fn clear_remembered(&mut self) {
        self.remembered.clear();
    }

    /// Ids of the permanent records written by the last successful save.
    pub fn persisted_ids(&self) -> &[String] {
        &self.persisted
    }

    /// The record addressable as "the" value for single-valued fields.
    pub fn primary_id(&self) -> Option<&str> {
        self.persisted.first().map(String::as_str)
    }

    pub(crate) fn set_persisted(&mut self, ids: Vec<String>) {
        self.persisted = ids;
    }

    /// True when an upload exists in this cycle, either freshly set or
    /// remembered from a prior failed attempt.
    pub fn has_upload(&self) -> bool {
        self.pending.is_some() || !self.remembered.is_empty()
    }
}
