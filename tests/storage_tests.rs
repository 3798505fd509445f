use attache::object_store::StoreKind;
use attache::storage::{Database, OwnerRef, UploadRecord};
use chrono::{Duration, Utc};

fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, db)
}

fn permanent_record(id: &str, key: &str, owner_id: &str) -> UploadRecord {
    let now = Utc::now();
    UploadRecord {
        id: id.to_string(),
        owner: Some(OwnerRef::new("Widget", owner_id)),
        attr: "manual".to_string(),
        storage: StoreKind::Local,
        key: key.to_string(),
        original_basename: "manual".to_string(),
        original_extension: ".pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        byte_size: 1024,
        temporary: false,
        expires_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn temporary_record(id: &str, key: &str, expires_at: chrono::DateTime<Utc>) -> UploadRecord {
    let now = Utc::now();
    UploadRecord {
        id: id.to_string(),
        owner: None,
        attr: "manual".to_string(),
        storage: StoreKind::Local,
        key: key.to_string(),
        original_basename: "manual".to_string(),
        original_extension: ".pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        byte_size: 1024,
        temporary: true,
        expires_at: Some(expires_at),
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn test_put_and_get_upload() {
    let (_dir, db) = test_db();
    db.put_upload(&permanent_record("u1", "key-a", "w1")).unwrap();

    let record = db.get_upload("u1").unwrap().expect("record should exist");
    assert_eq!(record.id, "u1");
    assert_eq!(record.key, "key-a");
    assert_eq!(record.owner, Some(OwnerRef::new("Widget", "w1")));
    assert_eq!(record.original_filename(), "manual.pdf");
    assert!(!record.temporary);
}

#[test]
fn test_get_upload_not_found() {
    let (_dir, db) = test_db();
    assert!(db.get_upload("nonexistent").unwrap().is_none());
}

#[test]
fn test_uploads_for_owner() {
    let (_dir, db) = test_db();
    db.put_upload(&permanent_record("a", "k1", "w1")).unwrap();
    db.put_upload(&permanent_record("b", "k2", "w1")).unwrap();
    db.put_upload(&permanent_record("c", "k3", "w2")).unwrap();

    let w1 = db
        .uploads_for_owner(&OwnerRef::new("Widget", "w1"), "manual")
        .unwrap();
    assert_eq!(w1.len(), 2);
    // Insertion order is preserved; the first record is the primary value.
    assert_eq!(w1[0].id, "a");
    assert_eq!(w1[1].id, "b");

    let other_attr = db
        .uploads_for_owner(&OwnerRef::new("Widget", "w1"), "thumbnail")
        .unwrap();
    assert!(other_attr.is_empty());
}

#[test]
fn test_delete_upload_reports_remaining_key_references() {
    let (_dir, db) = test_db();
    // Two records deduplicated onto one key.
    db.put_upload(&permanent_record("r1", "shared", "w1")).unwrap();
    db.put_upload(&permanent_record("r2", "shared", "w2")).unwrap();

    let removed = db.delete_upload("r1").unwrap().expect("r1 existed");
    assert_eq!(removed.key, "shared");
    assert!(removed.key_still_referenced);
    assert!(db.key_referenced("shared").unwrap());

    let removed = db.delete_upload("r2").unwrap().expect("r2 existed");
    assert!(!removed.key_still_referenced);
    assert!(!db.key_referenced("shared").unwrap());
}

#[test]
fn test_delete_upload_not_found() {
    let (_dir, db) = test_db();
    assert!(db.delete_upload("nonexistent").unwrap().is_none());
}

#[test]
fn test_delete_upload_cleans_owner_index() {
    let (_dir, db) = test_db();
    db.put_upload(&permanent_record("del", "k1", "w1")).unwrap();
    db.put_upload(&permanent_record("keep", "k2", "w1")).unwrap();

    db.delete_upload("del").unwrap();

    let remaining = db
        .uploads_for_owner(&OwnerRef::new("Widget", "w1"), "manual")
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "keep");
}

#[test]
fn test_promote_upload_mutates_in_place() {
    let (_dir, db) = test_db();
    let expires = Utc::now() + Duration::days(1);
    db.put_upload(&temporary_record("t1", "key-t", expires)).unwrap();

    let owner = OwnerRef::new("Widget", "w9");
    assert!(db.promote_upload("t1", &owner).unwrap());

    let record = db.get_upload("t1").unwrap().unwrap();
    assert!(!record.temporary);
    assert_eq!(record.expires_at, None);
    assert_eq!(record.owner, Some(owner.clone()));
    // Same record, same key -- nothing was re-created.
    assert_eq!(record.key, "key-t");

    // The promoted record is now reachable through the owner index.
    let owned = db.uploads_for_owner(&owner, "manual").unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].id, "t1");
}

#[test]
fn test_promote_upload_rejects_permanent_records() {
    let (_dir, db) = test_db();
    db.put_upload(&permanent_record("p1", "k", "w1")).unwrap();

    // A permanent record must never be re-owned through promotion.
    assert!(!db.promote_upload("p1", &OwnerRef::new("Widget", "attacker")).unwrap());

    let record = db.get_upload("p1").unwrap().unwrap();
    assert_eq!(record.owner, Some(OwnerRef::new("Widget", "w1")));
}

#[test]
fn test_promote_upload_not_found() {
    let (_dir, db) = test_db();
    assert!(!db.promote_upload("ghost", &OwnerRef::new("Widget", "w1")).unwrap());
}

#[test]
fn test_prune_expired_removes_only_stale_temporaries() {
    let (_dir, db) = test_db();
    let now = Utc::now();
    db.put_upload(&temporary_record("stale", "k1", now - Duration::hours(1)))
        .unwrap();
    db.put_upload(&temporary_record("fresh", "k2", now + Duration::hours(1)))
        .unwrap();
    db.put_upload(&permanent_record("perm", "k3", "w1")).unwrap();

    let removed = db.prune_expired(now).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].id, "stale");
    assert!(!removed[0].key_still_referenced);

    assert!(db.get_upload("stale").unwrap().is_none());
    assert!(db.get_upload("fresh").unwrap().is_some());
    assert!(db.get_upload("perm").unwrap().is_some());
}

#[test]
fn test_prune_expired_keeps_shared_keys_referenced() {
    let (_dir, db) = test_db();
    let now = Utc::now();
    db.put_upload(&temporary_record("stale", "shared", now - Duration::hours(1)))
        .unwrap();
    db.put_upload(&permanent_record("perm", "shared", "w1")).unwrap();

    let removed = db.prune_expired(now).unwrap();
    assert_eq!(removed.len(), 1);
    // The permanent record still references the key; the blob must survive.
    assert!(removed[0].key_still_referenced);
    assert!(db.key_referenced("shared").unwrap());
}

#[test]
fn test_count_uploads() {
    let (_dir, db) = test_db();
    assert_eq!(db.count_uploads().unwrap(), 0);

    db.put_upload(&permanent_record("a", "k1", "w1")).unwrap();
    db.put_upload(&temporary_record("b", "k2", Utc::now() + Duration::days(1)))
        .unwrap();
    assert_eq!(db.count_uploads().unwrap(), 2);
}
