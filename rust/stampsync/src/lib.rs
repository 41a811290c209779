//! Stamp-based reconciliation between an object store and a local build tree.
//!
//! A remote object (or a directory of objects) is mirrored locally as an empty
//! "stamp" file whose mtime carries the remote modification time, so a
//! dependency-graph evaluator can decide staleness without downloading data.
//! Around it sit advisory work claims on the store, the publish path for
//! finished outputs with their timestamp metadata, a verification sweep, and
//! the corpus tools built on record streams: the aggregator, the identifier
//! comparer and the compiler.

pub mod aggregate;
pub mod claim;
pub mod compare;
pub mod compile;
pub mod config;
pub mod finalize;
pub mod layout;
pub mod path_mapper;
pub mod reconcile;
pub mod stamp;
pub mod timestamp;
pub mod verify;

pub use aggregate::{AggregateReport, Aggregator, Location};
pub use claim::{ActiveClaim, ClaimOutcome, ClaimOwner, ClaimRecord, WorkClaimManager};
pub use compare::{CompareReport, IdComparer};
pub use compile::{CompileOptions, CompileReport, Compiler};
pub use config::{StoreConfig, SyncConfig};
pub use finalize::{FinalizeOutcome, FinalizePolicy, KeepTimestamp, UploadFinalizer};
pub use layout::{CorpusKey, CorpusLayout, RunId};
pub use path_mapper::{Layout, PathMapper};
pub use reconcile::{ReconcileOptions, ReconcileReport, StampReconciler};
pub use stamp::{Freshness, StampId, StampMode};
pub use timestamp::{
    TimestampOptions, TimestampOutcome, TimestampReport, TimestampSource, TimestampStamper,
};
pub use verify::{VerificationSweep, VerifyOptions, VerifyReport};

pub use stampsync_objectstore::{ObjectStore, ObjectUri};
