//! Claim and release command implementations

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Args;
use stampsync::{ClaimOutcome, SyncConfig, WorkClaimManager};

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_uri},
};

#[derive(Args, Debug)]
pub struct ClaimArgs {
    /// Remote target the work will produce (s3://bucket/key)
    pub target: String,

    /// Claims older than this are considered abandoned (default from config: 24)
    #[arg(long)]
    pub max_age_hours: Option<u64>,

    /// Local or remote files covered by the claim (can be specified multiple times)
    #[arg(long = "file")]
    pub files: Vec<String>,
}

fn manager(config: &SyncConfig) -> Result<WorkClaimManager> {
    Ok(WorkClaimManager::new(open_store(config)?).with_suffix(config.claim_suffix.clone())?)
}

pub fn run(global: &GlobalArgs, args: ClaimArgs) -> Result<Status> {
    let config = load_config(global)?;
    let target = parse_uri(&args.target)?;
    let max_age = match args.max_age_hours {
        Some(hours) => i64::try_from(hours)
            .ok()
            .and_then(Duration::try_hours)
            .context("--max-age-hours is out of range")?,
        None => config.claim_max_age(),
    };
    let files = if args.files.is_empty() {
        vec![target.to_string()]
    } else {
        args.files
    };

    let status = match manager(&config)?.try_claim_with_files(&target, max_age, files) {
        ClaimOutcome::AlreadyDone => Status::OutputExists,
        ClaimOutcome::AlreadyClaimed { .. } => Status::ClaimedElsewhere,
        ClaimOutcome::Claimed | ClaimOutcome::Reclaimed { .. } | ClaimOutcome::Unclaimed { .. } => {
            Status::Success
        }
    };
    Ok(status)
}

pub fn release(global: &GlobalArgs, target: String) -> Result<Status> {
    let config = load_config(global)?;
    let target = parse_uri(&target)?;
    // A missing marker is not an error; the work is done either way.
    manager(&config)?.release(&target);
    Ok(Status::Success)
}
