//! Compare command implementation

use anyhow::Result;
use clap::Args;
use stampsync::IdComparer;
use stampsync_records::FieldPath;

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_location, parse_uri},
};

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// First remote prefix (s3://bucket/prefix/)
    pub left: String,

    /// Second remote prefix
    pub right: String,

    /// Identifier field of the records, as a dotted path (e.g. `.id` or `meta.id`)
    #[arg(long, default_value = ".id")]
    pub id_field: String,

    /// Output for the common identifiers: an s3:// URI or a local path
    #[arg(long, short)]
    pub output: String,

    /// Only read keys ending with this suffix (can be specified multiple times)
    #[arg(long = "ext")]
    pub extensions: Vec<String>,
}

pub fn run(global: &GlobalArgs, args: CompareArgs) -> Result<Status> {
    let config = load_config(global)?;
    let left = parse_uri(&args.left)?;
    let right = parse_uri(&args.right)?;
    let output = parse_location(&args.output)?;
    let id_field = FieldPath::parse(&args.id_field)?;

    let report = IdComparer::new(open_store(&config)?).compare(
        &left,
        &right,
        &args.extensions,
        &id_field,
        &output,
    )?;
    println!(
        "{} ids in common ({} left, {} right, {} records without an id)",
        report.common, report.left_ids, report.right_ids, report.records_without_id
    );
    Ok(Status::Success)
}
