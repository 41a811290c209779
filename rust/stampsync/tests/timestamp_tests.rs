use serde_json::json;
use stampsync::{TimestampOptions, TimestampOutcome, TimestampSource, TimestampStamper};
use stampsync_objectstore::{ObjectMetadata, ObjectStore};
use stampsync_records::Compression;
use stampsync_testkit::{
    data_gen::{encode_jsonl, encode_text},
    fixtures::{memory_store, uri},
};

const KEY: &str = "impresso-last-ts";

fn extensions() -> Vec<String> {
    vec![".jsonl".into(), ".jsonl.bz2".into(), ".jsonl.gz".into()]
}

fn metadata_value(store: &dyn ObjectStore, object: &str) -> Option<String> {
    store.metadata(&uri(object)).unwrap().get(KEY).cloned()
}

#[test]
fn test_prefix_sweep_sets_record_timestamps() {
    let gdl = encode_jsonl(
        &[
            json!({"id": "GDL-1900-01-02-a-i0001", "ts": "2024-03-01T10:00:00Z"}),
            json!({"id": "GDL-1900-01-02-a-i0002", "ts": "2024-03-05T08:30:00Z"}),
        ],
        Compression::Bzip2,
    )
    .unwrap();
    let jdg = encode_jsonl(
        &[json!({"id": "JDG-1850-01-01-a-i0001", "cdt": "2023-12-24 18:00:00"})],
        Compression::Gzip,
    )
    .unwrap();
    let store = memory_store(&[
        ("s3://corpus/run/GDL-1900.jsonl.bz2", &gdl, 0),
        ("s3://corpus/run/JDG-1850.jsonl.gz", &jdg, 0),
        ("s3://corpus/run/README.txt", b"notes", 0),
    ]);
    let stamper = TimestampStamper::new(store.clone());
    let options = TimestampOptions {
        source: TimestampSource::from_field("ts", true),
        ..TimestampOptions::default()
    };

    let report = stamper
        .stamp_prefix(&uri("s3://corpus/run/"), &extensions(), &options)
        .unwrap();
    assert_eq!((report.processed, report.skipped, report.failed), (2, 0, 0));
    assert_eq!(
        metadata_value(store.as_ref(), "s3://corpus/run/GDL-1900.jsonl.bz2").as_deref(),
        Some("2024-03-05T08:30:00Z")
    );
    // `cdt` stands in for a missing `ts`, normalized to the same form.
    assert_eq!(
        metadata_value(store.as_ref(), "s3://corpus/run/JDG-1850.jsonl.gz").as_deref(),
        Some("2023-12-24T18:00:00Z")
    );
    assert!(store.metadata(&uri("s3://corpus/run/README.txt")).unwrap().is_empty());
    // Content is untouched.
    assert_eq!(store.content(&uri("s3://corpus/run/GDL-1900.jsonl.bz2")).unwrap(), gdl);

    let again = stamper
        .stamp_prefix(&uri("s3://corpus/run/"), &extensions(), &options)
        .unwrap();
    assert_eq!((again.processed, again.skipped), (0, 2));
}

#[test]
fn test_existing_value_is_kept_unless_forced() {
    let data = encode_jsonl(&[json!({"ts": "2024-01-01T00:00:00Z"})], Compression::None).unwrap();
    let store = memory_store(&[("s3://corpus/run/a.jsonl", &data, 0)]);
    let object = uri("s3://corpus/run/a.jsonl");
    let existing = ObjectMetadata::from([
        (KEY.to_string(), "2000-01-01T00:00:00Z".to_string()),
        ("origin".to_string(), "import".to_string()),
    ]);
    store.replace_metadata(&object, &existing).unwrap();
    let stamper = TimestampStamper::new(store.clone());

    let kept = stamper.stamp_object(&object, &TimestampOptions::default()).unwrap();
    assert_eq!(
        kept,
        TimestampOutcome::AlreadySet {
            value: "2000-01-01T00:00:00Z".into()
        }
    );

    let forced = TimestampOptions {
        force: true,
        ..TimestampOptions::default()
    };
    let updated = stamper.stamp_object(&object, &forced).unwrap();
    assert_eq!(
        updated,
        TimestampOutcome::Updated {
            value: "2024-01-01T00:00:00Z".into()
        }
    );
    // Other metadata survives the update.
    assert_eq!(store.metadata(&object).unwrap()["origin"], "import");
}

#[test]
fn test_objects_without_record_timestamps_use_their_mtime() {
    let data = encode_jsonl(&[json!({"id": "x"})], Compression::None).unwrap();
    let store = memory_store(&[
        ("s3://corpus/run/a.jsonl", &data, 0),
        ("s3://corpus/run/b.jsonl", &data, 60),
    ]);
    let stamper = TimestampStamper::new(store.clone());

    stamper
        .stamp_object(&uri("s3://corpus/run/a.jsonl"), &TimestampOptions::default())
        .unwrap();
    assert_eq!(
        metadata_value(store.as_ref(), "s3://corpus/run/a.jsonl").as_deref(),
        Some("2023-11-14T22:13:20Z")
    );

    let file_time = TimestampOptions {
        source: TimestampSource::FileTime,
        ..TimestampOptions::default()
    };
    stamper.stamp_object(&uri("s3://corpus/run/b.jsonl"), &file_time).unwrap();
    assert_eq!(
        metadata_value(store.as_ref(), "s3://corpus/run/b.jsonl").as_deref(),
        Some("2023-11-14T22:14:20Z")
    );
    // The file time needs no content.
    assert_eq!(store.requests().get, 1);
}

#[test]
fn test_unreadable_objects_do_not_stop_the_sweep() {
    let good = encode_jsonl(&[json!({"ts": "2024-01-01T00:00:00Z"})], Compression::Bzip2).unwrap();
    let truncated = encode_text("{\"ts\": \"2024-01-01T00:00:00Z\"}\n", Compression::Bzip2)
        .map(|data| data[..data.len() / 2].to_vec())
        .unwrap();
    let store = memory_store(&[
        ("s3://corpus/run/a.jsonl.bz2", &good, 0),
        ("s3://corpus/run/b.jsonl.bz2", &truncated, 0),
        ("s3://corpus/run/c.jsonl.bz2", &good, 0),
    ]);
    store.fail_get(&uri("s3://corpus/run/c.jsonl.bz2"));

    let report = TimestampStamper::new(store.clone())
        .stamp_prefix(&uri("s3://corpus/run/"), &extensions(), &TimestampOptions::default())
        .unwrap();
    assert_eq!((report.processed, report.skipped, report.failed), (1, 0, 2));
    assert!(metadata_value(store.as_ref(), "s3://corpus/run/b.jsonl.bz2").is_none());

    store.fail_listing(true);
    assert!(
        TimestampStamper::new(store.clone())
            .stamp_prefix(&uri("s3://corpus/run/"), &extensions(), &TimestampOptions::default())
            .is_err()
    );
}
