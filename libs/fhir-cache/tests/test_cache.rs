//! Integration tests for cache coordination: read-through behaviour,
//! corruption tolerance, atomicity, and mode faithfulness.

use anvil_cache::{CacheError, CacheMode, SnapshotCache};
use anvil_package::PackageRef;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn package() -> PackageRef {
    PackageRef::new("test.pkg", "1.0.0")
}

fn snapshot() -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "id": "ext-hearing-loss",
        "snapshot": {"element": [{"id": "Extension", "path": "Extension"}]}
    })
}

fn cache(tmp: &TempDir, mode: CacheMode) -> SnapshotCache {
    SnapshotCache::with_engine_version(tmp.path(), mode, "0.3.1")
}

#[tokio::test]
async fn lazy_generates_once_then_reads() {
    let tmp = TempDir::new().unwrap();
    let cache = cache(&tmp, CacheMode::Lazy);
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        let value = cache
            .get_or_generate::<_, _, CacheError>(
                &package(),
                "StructureDefinition-ext-hearing-loss.json",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(snapshot())
                },
            )
            .await
            .unwrap();
        assert_eq!(value["resourceType"], json!("StructureDefinition"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let file = cache.cache_file(&package(), "StructureDefinition-ext-hearing-loss.json");
    assert!(file.exists());
}

#[tokio::test]
async fn corrupt_cache_file_is_regenerated() {
    let tmp = TempDir::new().unwrap();
    let cache = cache(&tmp, CacheMode::Lazy);
    let file = cache.cache_file(&package(), "StructureDefinition-x.json");

    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "{\"resourceType\":\"StructureDefinition\"").unwrap();

    let value = cache
        .get_or_generate::<_, _, CacheError>(&package(), "StructureDefinition-x.json", || async {
            Ok(snapshot())
        })
        .await
        .unwrap();
    assert_eq!(value["resourceType"], json!("StructureDefinition"));

    // The file was rewritten and now parses cleanly.
    let on_disk: Value =
        serde_json::from_slice(&std::fs::read(&file).unwrap()).expect("valid JSON after recovery");
    assert_eq!(on_disk["resourceType"], json!("StructureDefinition"));
}

#[tokio::test]
async fn empty_and_typeless_files_read_as_misses() {
    let tmp = TempDir::new().unwrap();
    let cache = cache(&tmp, CacheMode::Lazy);

    for contents in ["", "   \n", "{\"note\":\"no resource type\"}"] {
        let file = cache.cache_file(&package(), "StructureDefinition-y.json");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, contents).unwrap();

        let read = cache
            .read(&package(), "StructureDefinition-y.json")
            .await
            .unwrap();
        assert!(read.is_none(), "contents {:?} should read as a miss", contents);
        assert!(!file.exists(), "contents {:?} should be removed", contents);
    }
}

#[tokio::test]
async fn none_mode_never_touches_the_cache() {
    let tmp = TempDir::new().unwrap();
    let cache = cache(&tmp, CacheMode::None);
    let file = cache.cache_file(&package(), "StructureDefinition-z.json");

    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "{\"resourceType\":\"dummy\"}").unwrap();

    let value = cache
        .get_or_generate::<_, _, CacheError>(&package(), "StructureDefinition-z.json", || async {
            Ok(snapshot())
        })
        .await
        .unwrap();

    // The generator ran and the pre-existing file is untouched.
    assert_eq!(value["id"], json!("ext-hearing-loss"));
    let on_disk: Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
    assert_eq!(on_disk, json!({"resourceType": "dummy"}));

    // No lockfile or temp residue either.
    let residue: Vec<_> = std::fs::read_dir(file.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "StructureDefinition-z.json")
        .collect();
    assert!(residue.is_empty(), "unexpected files: {:?}", residue);
}

#[tokio::test]
async fn write_is_atomic_and_leaves_no_temp_files() {
    let tmp = TempDir::new().unwrap();
    let cache = cache(&tmp, CacheMode::Lazy);

    cache
        .write(&package(), "StructureDefinition-a.json", &snapshot())
        .await
        .unwrap();

    let dir = cache.snapshot_dir(&package());
    let names: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["StructureDefinition-a.json".to_string()]);
}

#[tokio::test]
async fn losing_the_write_race_is_success() {
    let tmp = TempDir::new().unwrap();
    let cache = cache(&tmp, CacheMode::Lazy);

    cache
        .write(&package(), "StructureDefinition-b.json", &snapshot())
        .await
        .unwrap();
    // Second write with different content: the first writer won, silently.
    cache
        .write(
            &package(),
            "StructureDefinition-b.json",
            &json!({"resourceType": "StructureDefinition", "id": "other"}),
        )
        .await
        .unwrap();

    let read = cache
        .read(&package(), "StructureDefinition-b.json")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read["id"], json!("ext-hearing-loss"));
}

#[tokio::test]
async fn clear_package_removes_snapshot_subtree() {
    let tmp = TempDir::new().unwrap();
    let cache = cache(&tmp, CacheMode::Rebuild);

    cache
        .write(&package(), "StructureDefinition-c.json", &snapshot())
        .await
        .unwrap();
    assert!(cache.snapshot_dir(&package()).exists());

    cache.clear_package(&package()).await.unwrap();
    assert!(!cache.snapshot_dir(&package()).exists());

    // Clearing an absent subtree is fine.
    cache.clear_package(&package()).await.unwrap();
}
