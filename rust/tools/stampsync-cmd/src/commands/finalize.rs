//! Finalize command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use stampsync::{
    CorpusLayout, FinalizeOutcome, KeepTimestamp, TimestampOptions, TimestampSource,
    UploadFinalizer, WorkClaimManager,
    timestamp::{DEFAULT_METADATA_KEY, DEFAULT_TIMESTAMP_FIELD},
};
use stampsync_records::validator::{AcceptAll, JsonLinesValidator, Validator};

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_uri},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KeepMode {
    /// The mtime of the output before truncation
    Preserve,
    /// The current time
    Now,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    /// `<label>/<run-id>/<unit>/.../<file>`
    Flat,
    /// `<label>/<run-id>/<provider>/<unit>/.../<file>`
    Provider,
}

impl From<LayoutArg> for CorpusLayout {
    fn from(layout: LayoutArg) -> CorpusLayout {
        match layout {
            LayoutArg::Flat => CorpusLayout::Flat,
            LayoutArg::Provider => CorpusLayout::WithProvider,
        }
    }
}

#[derive(Args, Debug)]
pub struct FinalizeArgs {
    /// Local output to publish
    pub local_path: PathBuf,

    /// Remote target (default: derived from the local path under the build root)
    #[arg(long)]
    pub target: Option<String>,

    /// Suffix removed from the local path before deriving the target
    #[arg(long)]
    pub strip_suffix: Option<String>,

    /// Replace an existing target instead of skipping the upload
    #[arg(long)]
    pub overwrite: bool,

    /// Read the upload back and compare digests
    #[arg(long)]
    pub verify_upload: bool,

    /// Truncate the local output after publishing, keeping its timestamp
    #[arg(long, value_enum, conflicts_with = "keep_timestamp_at")]
    pub keep_timestamp_only: Option<KeepMode>,

    /// Like --keep-timestamp-only, with an explicit RFC 3339 timestamp
    #[arg(long)]
    pub keep_timestamp_at: Option<DateTime<Utc>>,

    /// Require the output to decode as JSON lines with at least this many records
    #[arg(long)]
    pub min_records: Option<u64>,

    /// Companion file (e.g. the processing log) published with the output
    #[arg(long)]
    pub companion: Option<PathBuf>,

    /// Remove the work claim of the target afterwards
    #[arg(long)]
    pub release_claim: bool,

    /// Attach the time of the latest record as metadata of the published object
    #[arg(long)]
    pub set_timestamp: bool,

    /// Record field holding the timestamp; `__file__` uses the local file's mtime
    #[arg(long, default_value = DEFAULT_TIMESTAMP_FIELD, requires = "set_timestamp")]
    pub ts_key: String,

    /// Metadata key receiving the timestamp
    #[arg(long, default_value = DEFAULT_METADATA_KEY, requires = "set_timestamp")]
    pub metadata_key: String,

    /// Take the latest timestamp over all records instead of the first one
    #[arg(long, requires = "set_timestamp")]
    pub all_lines: bool,

    /// Reject targets whose key does not follow this corpus layout
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,
}

pub fn run(global: &GlobalArgs, args: FinalizeArgs) -> Result<Status> {
    let config = load_config(global)?;
    config.validate()?;
    let mapper = config.mapper()?;
    let store = open_store(&config)?;

    let target = match &args.target {
        Some(target) => parse_uri(target)?,
        None => mapper.to_remote(&args.local_path, args.strip_suffix.as_deref())?,
    };

    let mut policy = config.finalize_policy();
    policy.quit_if_exists = !args.overwrite;
    policy.verify_upload = args.verify_upload;
    policy.keep_timestamp_only = match (args.keep_timestamp_only, args.keep_timestamp_at) {
        (_, Some(at)) => Some(KeepTimestamp::At(at)),
        (Some(KeepMode::Preserve), None) => Some(KeepTimestamp::Preserve),
        (Some(KeepMode::Now), None) => Some(KeepTimestamp::Now),
        (None, None) => None,
    };
    if args.set_timestamp {
        policy.timestamp_metadata = Some(TimestampOptions {
            metadata_key: args.metadata_key.clone(),
            source: TimestampSource::from_field(&args.ts_key, args.all_lines),
            force: true,
        });
    }
    policy.corpus_layout = args.layout.map(CorpusLayout::from);

    let validator: Box<dyn Validator> = match args.min_records {
        Some(min_records) => Box::new(JsonLinesValidator { min_records }),
        None => Box::new(AcceptAll),
    };

    let finalizer = UploadFinalizer::new(store.clone());
    let outcome = finalizer
        .finalize(&args.local_path, &target, &policy, validator.as_ref())
        .with_context(|| format!("Failed to publish {}", args.local_path.display()))?;

    if let Some(companion) = &args.companion {
        let companion_target = mapper.to_remote(companion, None)?;
        finalizer.finalize_companion(companion, &companion_target, &outcome, &policy)?;
    }

    if args.release_claim {
        WorkClaimManager::new(store)
            .with_suffix(config.claim_suffix.clone())?
            .release(&target);
    }

    Ok(match outcome {
        FinalizeOutcome::Published { bytes } => {
            println!("published {target} ({bytes} bytes)");
            Status::Success
        }
        FinalizeOutcome::SkippedExists => Status::OutputExists,
        FinalizeOutcome::ValidationFailed { reason } => {
            log::error!("{}: {reason}", args.local_path.display());
            Status::ValidationFailed
        }
    })
}
