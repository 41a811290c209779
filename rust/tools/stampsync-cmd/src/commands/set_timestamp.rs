//! Set-timestamp command implementation

use anyhow::{Context, Result};
use clap::Args;
use stampsync::{
    TimestampOptions, TimestampOutcome, TimestampSource, TimestampStamper,
    timestamp::{DEFAULT_EXTENSIONS, DEFAULT_METADATA_KEY, DEFAULT_TIMESTAMP_FIELD},
};

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_uri},
};

#[derive(Args, Debug)]
pub struct SetTimestampArgs {
    /// Remote object, or a prefix ending with `/` to stamp every object below it
    pub uri: String,

    /// Metadata key receiving the timestamp
    #[arg(long, default_value = DEFAULT_METADATA_KEY)]
    pub metadata_key: String,

    /// Record field holding the timestamp; `__file__` uses the object's modification time
    #[arg(long, default_value = DEFAULT_TIMESTAMP_FIELD)]
    pub ts_key: String,

    /// Take the latest timestamp over all records instead of the first one
    #[arg(long)]
    pub all_lines: bool,

    /// Replace a timestamp that is already set
    #[arg(long)]
    pub force: bool,

    /// Only stamp keys ending with this suffix (can be specified multiple times)
    #[arg(long = "ext")]
    pub extensions: Vec<String>,
}

pub fn run(global: &GlobalArgs, args: SetTimestampArgs) -> Result<Status> {
    let config = load_config(global)?;
    let uri = parse_uri(&args.uri)?;
    let stamper = TimestampStamper::new(open_store(&config)?);
    let options = TimestampOptions {
        metadata_key: args.metadata_key.clone(),
        source: TimestampSource::from_field(&args.ts_key, args.all_lines),
        force: args.force,
    };

    if !uri.is_container() {
        let outcome = stamper
            .stamp_object(&uri, &options)
            .with_context(|| format!("Failed to set the timestamp of {uri}"))?;
        match outcome {
            TimestampOutcome::Updated { value } => {
                println!("{uri}: {}={value}", args.metadata_key)
            }
            TimestampOutcome::AlreadySet { value } => {
                println!("{uri}: {}={value} (already set)", args.metadata_key)
            }
        }
        return Ok(Status::Success);
    }

    let extensions = if args.extensions.is_empty() {
        DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
    } else {
        args.extensions
    };
    let report = stamper.stamp_prefix(&uri, &extensions, &options)?;
    println!(
        "{} processed, {} skipped, {} failed",
        report.processed, report.skipped, report.failed
    );
    Ok(if report.failed == 0 {
        Status::Success
    } else {
        Status::Failure
    })
}
