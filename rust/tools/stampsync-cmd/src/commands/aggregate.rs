//! Aggregate command implementation

use anyhow::{Result, bail};
use clap::Args;
use stampsync::Aggregator;
use stampsync_records::transform::{
    Chain, Identity, KeyFilter, KeyProjection, Sampler, Sampling,
};

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_location, parse_uri},
};

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Remote prefix whose objects are merged (s3://bucket/prefix/)
    pub prefix: String,

    /// Output: an s3:// URI or a local path; the extension selects the compression
    #[arg(long, short)]
    pub output: String,

    /// Only merge keys ending with this suffix (can be specified multiple times)
    #[arg(long = "ext")]
    pub extensions: Vec<String>,

    /// Keep records whose key has this value, e.g. `lg=fr` (all conditions must match)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Keep only these top-level keys of each record
    #[arg(long = "keys", value_delimiter = ',')]
    pub keys: Vec<String>,

    /// Keep each record with this probability
    #[arg(long, conflicts_with = "group_by")]
    pub sample_rate: Option<f64>,

    /// Group records by this key and keep the first --max-per-group of each
    #[arg(long, requires = "max_per_group")]
    pub group_by: Option<String>,

    #[arg(long, requires = "group_by")]
    pub max_per_group: Option<usize>,

    /// Seed of the sampler
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

fn build_transform(args: &AggregateArgs) -> Result<Chain> {
    let mut chain = Chain::new();
    if !args.filters.is_empty() {
        chain = chain.then(KeyFilter::parse(&args.filters)?);
    }
    let sampling = match (args.sample_rate, &args.group_by, args.max_per_group) {
        (Some(rate), None, _) => Some(Sampling::Rate(rate)),
        (None, Some(key), Some(max)) => Some(Sampling::PerGroup { key: key.clone(), max }),
        (None, None, None) => None,
        _ => bail!("--sample-rate and --group-by/--max-per-group are exclusive"),
    };
    if let Some(sampling) = sampling {
        chain = chain.then(Sampler::new(sampling, args.seed)?);
    }
    if !args.keys.is_empty() {
        chain = chain.then(KeyProjection::new(args.keys.clone()));
    }
    if chain.is_empty() {
        chain = chain.then(Identity);
    }
    Ok(chain)
}

pub fn run(global: &GlobalArgs, args: AggregateArgs) -> Result<Status> {
    let config = load_config(global)?;
    let prefix = parse_uri(&args.prefix)?;
    let output = parse_location(&args.output)?;
    let mut transform = build_transform(&args)?;

    let report = Aggregator::new(open_store(&config)?).aggregate(
        &prefix,
        &args.extensions,
        &mut transform,
        &output,
    )?;
    println!(
        "{} records from {} objects ({} malformed lines skipped)",
        report.record_count(),
        report.objects,
        report.malformed_lines
    );
    Ok(Status::Success)
}
