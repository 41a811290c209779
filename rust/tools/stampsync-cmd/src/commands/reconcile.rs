//! Reconcile command implementation

use anyhow::Result;
use clap::Args;
use stampsync::{ReconcileOptions, StampMode, StampReconciler};

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_uri},
};

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Remote prefix (s3://bucket/prefix/)
    pub prefix: String,

    /// One stamp per directory, grouping keys by dropping this many trailing components
    #[arg(long)]
    pub directory_level: Option<usize>,

    /// Stamp file suffix (per-directory stamps default to the configured suffix)
    #[arg(long)]
    pub stamp_suffix: Option<String>,

    /// Only consider keys ending with this suffix (can be specified multiple times)
    #[arg(long = "ext")]
    pub extensions: Vec<String>,

    /// Delete local stamps whose remote object is gone
    #[arg(long)]
    pub remove_dangling: bool,

    /// Read every object's metadata instead of trusting the listing
    #[arg(long)]
    pub refresh_metadata: bool,
}

pub fn run(global: &GlobalArgs, args: ReconcileArgs) -> Result<Status> {
    let config = load_config(global)?;
    config.validate()?;
    let prefix = parse_uri(&args.prefix)?;

    let mode = match args.directory_level {
        Some(level) => StampMode::per_directory(
            level,
            args.stamp_suffix.unwrap_or_else(|| config.stamp_suffix.clone()),
        )?,
        None => match args.stamp_suffix {
            Some(suffix) => StampMode::per_object_with_suffix(suffix),
            None => StampMode::per_object(),
        },
    };
    let options = ReconcileOptions {
        mode,
        extension_filter: args.extensions,
        remove_dangling: args.remove_dangling,
        refresh_metadata: args.refresh_metadata,
    };

    let reconciler = StampReconciler::new(open_store(&config)?, config.mapper()?);
    let report = reconciler.reconcile(&prefix, &options)?;
    println!(
        "created: {}, updated: {}, unchanged: {}, removed: {}, skipped: {}",
        report.created, report.updated, report.unchanged, report.removed_dangling, report.skipped
    );
    Ok(Status::Success)
}
