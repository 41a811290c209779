use std::{path::Path, sync::Arc, time::Duration};

use serde_json::json;
use stampsync::{
    CorpusLayout, FinalizeOutcome, FinalizePolicy, KeepTimestamp, TimestampOptions,
    TimestampSource, UploadFinalizer,
};
use stampsync_common::error::ErrorKind;
use stampsync_objectstore::ObjectStore;
use stampsync_records::{
    Compression,
    validator::{AcceptAll, JsonLinesValidator},
};
use stampsync_testkit::{
    data_gen::{NewspaperGen, encode_jsonl, encode_text},
    dirs::{BuildTree, mtime, set_mtime, write_file},
    fixtures::{ConcealingStore, memory_store, ts, uri},
};

fn fast_policy() -> FinalizePolicy {
    FinalizePolicy {
        attempts: 3,
        retry_delay: Duration::ZERO,
        ..FinalizePolicy::default()
    }
}

fn sample_output(tree: &BuildTree, relative: &str) -> (std::path::PathBuf, Vec<u8>) {
    let date = chrono::NaiveDate::from_ymd_opt(1900, 1, 2).unwrap();
    let records = NewspaperGen::new(3).issue("GDL", date, 20);
    let data = encode_jsonl(&records, Compression::Bzip2).unwrap();
    let path = tree.local(relative);
    write_file(&path, &data).unwrap();
    (path, data)
}

#[test]
fn test_publish_and_keep_timestamp() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let (local, data) = sample_output(&tree, "corpus/run/GDL-1900.jsonl.bz2");
    set_mtime(&local, 1_650_000_000).unwrap();
    let target = uri("s3://corpus/run/GDL-1900.jsonl.bz2");

    let policy = FinalizePolicy {
        keep_timestamp_only: Some(KeepTimestamp::Preserve),
        verify_upload: true,
        ..fast_policy()
    };
    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &JsonLinesValidator { min_records: 1 })
        .unwrap();
    assert_eq!(
        outcome,
        FinalizeOutcome::Published {
            bytes: data.len() as u64
        }
    );
    assert_eq!(store.content(&target).unwrap(), data);
    assert_eq!(std::fs::metadata(&local).unwrap().len(), 0);
    assert_eq!(mtime(&local).unwrap(), 1_650_000_000);
}

#[test]
fn test_existing_target_is_never_overwritten() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[("s3://corpus/run/a.jsonl.bz2", b"original", 0)]);
    let (local, data) = sample_output(&tree, "corpus/run/a.jsonl.bz2");
    let target = uri("s3://corpus/run/a.jsonl.bz2");

    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &fast_policy(), &AcceptAll)
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::SkippedExists);
    assert_eq!(store.content(&target).unwrap(), b"original");
    assert_eq!(std::fs::read(&local).unwrap(), data);
    assert_eq!(store.requests().put, 0);
}

#[test]
fn test_concurrent_publisher_wins() {
    let tree = BuildTree::new().unwrap();
    let inner = memory_store(&[("s3://corpus/run/a.jsonl.bz2", b"theirs", 0)]);
    let target = uri("s3://corpus/run/a.jsonl.bz2");
    let store = Arc::new(ConcealingStore::new(inner.clone()));
    store.conceal(&target, 1);
    let (local, _) = sample_output(&tree, "corpus/run/a.jsonl.bz2");

    let policy = FinalizePolicy {
        keep_timestamp_only: Some(KeepTimestamp::Now),
        ..fast_policy()
    };
    let outcome = UploadFinalizer::new(store)
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::SkippedExists);
    assert_eq!(inner.content(&target).unwrap(), b"theirs");
    // Nothing was published, so the local output is left as is.
    assert!(std::fs::metadata(&local).unwrap().len() > 0);
}

#[test]
fn test_overwrite_when_not_quitting() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[("s3://corpus/run/a.jsonl.bz2", b"old", 0)]);
    let (local, data) = sample_output(&tree, "corpus/run/a.jsonl.bz2");
    let target = uri("s3://corpus/run/a.jsonl.bz2");
    let policy = FinalizePolicy {
        quit_if_exists: false,
        ..fast_policy()
    };
    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Published { .. }));
    assert_eq!(store.content(&target).unwrap(), data);
}

#[test]
fn test_failed_validation_leaves_remote_untouched() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[("s3://corpus/run/other.jsonl.bz2", b"x", 0)]);
    let local = tree.local("corpus/run/a.jsonl.bz2");
    write_file(&local, &encode_text("{\"id\":1}\n{broken\n", Compression::Bzip2).unwrap()).unwrap();
    let target = uri("s3://corpus/run/a.jsonl.bz2");

    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &fast_policy(), &JsonLinesValidator { min_records: 1 })
        .unwrap();
    assert!(matches!(outcome, FinalizeOutcome::ValidationFailed { .. }));
    assert!(!local.exists());
    assert_eq!(store.keys(), vec![uri("s3://corpus/run/other.jsonl.bz2")]);
    assert_eq!(store.requests().put, 0);
}

#[test]
fn test_custom_validator() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let (local, _) = sample_output(&tree, "corpus/run/a.jsonl.bz2");
    let refuse = |p: &Path| -> Result<(), String> { Err(format!("{} rejected", p.display())) };
    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &uri("s3://corpus/run/a.jsonl.bz2"), &fast_policy(), &refuse)
        .unwrap();
    match outcome {
        FinalizeOutcome::ValidationFailed { reason } => assert!(reason.ends_with("rejected")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(store.keys().is_empty());
}

#[test]
fn test_upload_failure_removes_local_output() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let target = uri("s3://corpus/run/a.jsonl.bz2");
    store.fail_put(&target);
    let (local, _) = sample_output(&tree, "corpus/run/a.jsonl.bz2");

    let policy = FinalizePolicy {
        keep_timestamp_only: Some(KeepTimestamp::Preserve),
        ..fast_policy()
    };
    let err = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap_err();
    assert!(err.to_string().contains("s3://corpus/run/a.jsonl.bz2"));
    assert_eq!(store.requests().put, 3);
    assert!(!local.exists());
    assert!(store.content(&target).is_none());
}

#[test]
fn test_failed_overwrite_keeps_published_object() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[("s3://corpus/run/a.jsonl.bz2", b"published", 0)]);
    let target = uri("s3://corpus/run/a.jsonl.bz2");
    store.fail_put(&target);
    let (local, _) = sample_output(&tree, "corpus/run/a.jsonl.bz2");

    let policy = FinalizePolicy {
        quit_if_exists: false,
        ..fast_policy()
    };
    UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap_err();
    assert_eq!(store.content(&target).unwrap(), b"published");
    assert_eq!(store.requests().delete, 0);
}

#[test]
fn test_failed_upload_keeps_concurrent_result() {
    let tree = BuildTree::new().unwrap();
    let inner = Arc::new(
        stampsync_objectstore::memory_store::MemoryObjectStore::new().without_conditional_put(),
    );
    let target = uri("s3://corpus/run/a.jsonl.bz2");
    inner.insert(&target, b"theirs".to_vec(), ts(0));
    inner.fail_put(&target);
    let store = Arc::new(ConcealingStore::new(inner.clone()));
    store.conceal(&target, 1);
    let (local, _) = sample_output(&tree, "corpus/run/a.jsonl.bz2");

    UploadFinalizer::new(store)
        .finalize(&local, &target, &fast_policy(), &AcceptAll)
        .unwrap_err();
    assert_eq!(inner.content(&target).unwrap(), b"theirs");
}

#[test]
fn test_verified_upload_retries_corrupted_copy() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    store.corrupt_puts(1);
    let (local, data) = sample_output(&tree, "corpus/run/a.jsonl.bz2");
    let target = uri("s3://corpus/run/a.jsonl.bz2");

    let policy = FinalizePolicy {
        verify_upload: true,
        ..fast_policy()
    };
    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Published { .. }));
    assert_eq!(store.content(&target).unwrap(), data);
    assert_eq!(store.requests().put, 2);
}

#[test]
fn test_companion_follows_primary() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let (local, _) = sample_output(&tree, "corpus/run/a.jsonl.bz2");
    let log = tree.local("corpus/run/a.jsonl.bz2.log.gz");
    write_file(&log, &encode_text("processed 20 items\n", Compression::Gzip).unwrap()).unwrap();
    let target = uri("s3://corpus/run/a.jsonl.bz2");
    let log_target = uri("s3://corpus/run/a.jsonl.bz2.log.gz");

    let finalizer = UploadFinalizer::new(store.clone());
    let policy = FinalizePolicy {
        keep_timestamp_only: Some(KeepTimestamp::At(ts(0))),
        ..fast_policy()
    };
    let skipped = FinalizeOutcome::SkippedExists;
    assert!(!finalizer.finalize_companion(&log, &log_target, &skipped, &policy).unwrap());
    assert!(store.content(&log_target).is_none());

    let primary = finalizer.finalize(&local, &target, &policy, &AcceptAll).unwrap();
    assert!(finalizer.finalize_companion(&log, &log_target, &primary, &policy).unwrap());
    assert!(store.content(&log_target).is_some());
    assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);
    assert_eq!(mtime(&log).unwrap(), ts(0).timestamp());
}

#[test]
fn test_published_object_carries_last_record_time() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let records = [
        json!({"id": "GDL-1900-01-02-a-i0001", "ts": "2024-02-01T09:00:00Z"}),
        json!({"id": "GDL-1900-01-02-a-i0002", "ts": "2024-02-03T17:45:00Z"}),
    ];
    let local = tree.local("corpus/run/a.jsonl.bz2");
    write_file(&local, &encode_jsonl(&records, Compression::Bzip2).unwrap()).unwrap();
    let target = uri("s3://corpus/run/a.jsonl.bz2");

    let policy = FinalizePolicy {
        keep_timestamp_only: Some(KeepTimestamp::Preserve),
        timestamp_metadata: Some(TimestampOptions {
            source: TimestampSource::from_field("ts", true),
            ..TimestampOptions::default()
        }),
        ..fast_policy()
    };
    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Published { .. }));
    let metadata = store.metadata(&target).unwrap();
    assert_eq!(metadata["impresso-last-ts"], "2024-02-03T17:45:00Z");
    // The timestamp was read before the local copy was truncated.
    assert_eq!(std::fs::metadata(&local).unwrap().len(), 0);
}

#[test]
fn test_file_time_metadata_uses_local_mtime() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let (local, _) = sample_output(&tree, "corpus/run/a.jsonl.bz2");
    set_mtime(&local, ts(30).timestamp()).unwrap();
    let target = uri("s3://corpus/run/a.jsonl.bz2");

    let policy = FinalizePolicy {
        timestamp_metadata: Some(TimestampOptions {
            metadata_key: "last-modified".into(),
            source: TimestampSource::FileTime,
            force: false,
        }),
        ..fast_policy()
    };
    UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap();
    assert_eq!(store.metadata(&target).unwrap()["last-modified"], "2023-11-14T22:13:50Z");
}

#[test]
fn test_metadata_failure_keeps_publication() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let target = uri("s3://corpus/run/a.jsonl.bz2");
    let (local, data) = sample_output(&tree, "corpus/run/a.jsonl.bz2");
    let policy = FinalizePolicy {
        quit_if_exists: false,
        timestamp_metadata: Some(TimestampOptions::default()),
        ..fast_policy()
    };
    // Metadata reads fail, the upload itself does not.
    store.fail_head(&target);
    let outcome = UploadFinalizer::new(store.clone())
        .finalize(&local, &target, &policy, &AcceptAll)
        .unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Published { .. }));
    assert_eq!(store.content(&target).unwrap(), data);
}

#[test]
fn test_target_outside_corpus_layout_is_rejected() {
    let tree = BuildTree::new().unwrap();
    let store = memory_store(&[]);
    let (local, data) = sample_output(&tree, "corpus/misc/a.jsonl.bz2");
    let policy = FinalizePolicy {
        corpus_layout: Some(CorpusLayout::Flat),
        ..fast_policy()
    };
    let finalizer = UploadFinalizer::new(store.clone());

    let err = finalizer
        .finalize(&local, &uri("s3://corpus/misc/a.jsonl.bz2"), &policy, &AcceptAll)
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    assert!(store.keys().is_empty());
    assert_eq!(std::fs::read(&local).unwrap(), data);

    let target = uri("s3://corpus/langident/langident_lid_ensemble_v2-0-1/GDL/GDL-1900.jsonl.bz2");
    let outcome = finalizer.finalize(&local, &target, &policy, &AcceptAll).unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Published { .. }));
}
