//! attache - two-phase upload lifecycle management for record-backed entities
//!
//! This crate attaches uploaded files to a parent entity's fields and walks
//! each blob through a temporary/permanent lifecycle:
//! - Uploads on failed save attempts are persisted as *temporary* metadata
//!   so redisplayed forms don't force a re-upload
//! - A round-trip token carries the temp references back on resubmission;
//!   on a successful save they are *promoted* in place
//! - Blobs are content-keyed and deduplicated across owners; a blob is only
//!   deleted when its last metadata record goes away
//! - Swappable storage backends (local filesystem, S3) and an optional
//!   transform pipeline producing derived variants per upload
//!
//! Metadata lives in a redb embedded database; the owning entity's own
//! persistence (and its transaction/rollback semantics) stays with the
//! caller behind the [`lifecycle::UploadOwner`] trait.

pub mod config;
pub mod field;
pub mod key;
pub mod lifecycle;
pub mod mapper;
pub mod object_store;
pub mod storage;
pub mod token;
pub mod upload;
pub mod validation;

pub use config::{Config, ConfigError};
pub use field::{FieldDescriptor, TempRef, TempWritePolicy, UploadField};
pub use lifecycle::{Lifecycle, LifecycleError, UploadOwner};
pub use mapper::{Mapper, Transform};
pub use object_store::{ObjectStore, StoreError, StoreKind, StoreRegistry};
pub use storage::{Database, OwnerRef, UploadRecord};
pub use upload::Upload;
pub use validation::{FieldErrors, UploadRules};
