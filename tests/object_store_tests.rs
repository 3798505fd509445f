use attache::object_store::{LocalStore, ObjectStore, StoreError, StoreKind, UrlOptions};
use attache::upload::MemorySource;
use bytes::Bytes;

fn test_store() -> (tempfile::TempDir, LocalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path().join("files"), "test");
    (dir, store)
}

#[tokio::test]
async fn test_write_and_read() {
    let (_dir, store) = test_store();
    let mut source = MemorySource::new(Bytes::from_static(b"hello world"));

    store.write("abc123", &mut source).await.unwrap();

    let data = store.read("abc123").await.unwrap();
    assert_eq!(&data[..], b"hello world");
}

#[tokio::test]
async fn test_read_not_found() {
    let (_dir, store) = test_store();

    match store.read("missing").await {
        Err(StoreError::NotFound(key)) => assert_eq!(key, "missing"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_write_existing_key_is_a_noop() {
    let (_dir, store) = test_store();

    let mut first = MemorySource::new(Bytes::from_static(b"original"));
    store.write("dup", &mut first).await.unwrap();

    // Keys are content-derived, so a second write under the same key must
    // leave the original bytes untouched.
    let mut second = MemorySource::new(Bytes::from_static(b"different"));
    store.write("dup", &mut second).await.unwrap();

    let data = store.read("dup").await.unwrap();
    assert_eq!(&data[..], b"original");
}

#[tokio::test]
async fn test_exists() {
    let (_dir, store) = test_store();
    assert!(!store.exists("k").await.unwrap());

    let mut source = MemorySource::new(Bytes::from_static(b"x"));
    store.write("k", &mut source).await.unwrap();
    assert!(store.exists("k").await.unwrap());
}

#[tokio::test]
async fn test_delete() {
    let (_dir, store) = test_store();
    let mut source = MemorySource::new(Bytes::from_static(b"x"));
    store.write("k", &mut source).await.unwrap();

    store.delete("k").await.unwrap();
    assert!(!store.exists("k").await.unwrap());

    // Deleting an absent key is not an error.
    store.delete("k").await.unwrap();
}

#[tokio::test]
async fn test_root_created_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("files");
    let store = LocalStore::new(&root, "test");

    assert!(!root.exists());

    let mut source = MemorySource::new(Bytes::from_static(b"x"));
    store.write("k", &mut source).await.unwrap();
    assert!(root.join("test").join("k").is_file());
}

#[tokio::test]
async fn test_environment_scoping() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("files");
    let test_store = LocalStore::new(&root, "test");
    let dev_store = LocalStore::new(&root, "development");

    let mut source = MemorySource::new(Bytes::from_static(b"x"));
    test_store.write("k", &mut source).await.unwrap();

    assert!(test_store.exists("k").await.unwrap());
    assert!(!dev_store.exists("k").await.unwrap());
}

#[tokio::test]
async fn test_path() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("files");
    let store = LocalStore::new(&root, "test");

    let path = store.path("abc").unwrap();
    assert_eq!(path, root.join("test").join("abc"));
}

#[tokio::test]
async fn test_url_unsupported() {
    let (_dir, store) = test_store();
    assert!(matches!(
        store.url("k", UrlOptions::default()).await,
        Err(StoreError::Unsupported("url"))
    ));
}

#[test]
fn test_kind() {
    let (_dir, store) = test_store();
    assert_eq!(store.kind(), StoreKind::Local);
}
