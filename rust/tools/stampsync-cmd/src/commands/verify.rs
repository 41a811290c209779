//! Verify command implementation

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use regex::Regex;
use stampsync::{ObjectUri, VerificationSweep, VerifyOptions, verify::write_deletion_manifest};

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_uri},
};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Remote prefix to sweep (s3://bucket/prefix/)
    pub prefix: String,

    /// Only check keys ending with this suffix (can be specified multiple times)
    #[arg(long = "ext")]
    pub extensions: Vec<String>,

    /// Delete the corrupted objects
    #[arg(long)]
    pub delete: bool,

    /// Suffix of companion objects; a corrupted companion takes its primary along
    #[arg(long)]
    pub companion_suffix: Option<String>,

    /// Report objects with a line matching this regular expression
    #[arg(long)]
    pub flag_pattern: Option<Regex>,

    /// Write bulk-deletion manifests for the corrupted and flagged keys
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

pub fn run(global: &GlobalArgs, args: VerifyArgs) -> Result<Status> {
    let config = load_config(global)?;
    let prefix = parse_uri(&args.prefix)?;
    let store = open_store(&config)?;

    let options = VerifyOptions {
        extensions: args.extensions,
        delete_corrupted: args.delete,
        companion_suffix: args.companion_suffix.clone(),
        flag_pattern: args.flag_pattern,
    };
    let report = VerificationSweep::new(store.clone()).verify(&prefix, &options)?;

    for corrupted in &report.corrupted {
        println!("corrupted {}: {}", corrupted.uri, corrupted.reason);
    }
    for flagged in &report.flagged {
        println!("flagged {flagged}");
    }
    println!(
        "checked: {}, corrupted: {}, deleted: {}, flagged: {}",
        report.checked,
        report.corrupted.len(),
        report.deleted.len(),
        report.flagged.len()
    );

    if let Some(manifest) = &args.manifest {
        let mut keys: Vec<ObjectUri> = report
            .corrupted
            .iter()
            .map(|c| &c.uri)
            .filter(|uri| !report.deleted.contains(uri))
            .cloned()
            .collect();
        for flagged in &report.flagged {
            keys.push(flagged.clone());
            if let Some(suffix) = &args.companion_suffix {
                let companion = flagged.with_suffix(suffix)?;
                if store.exists(&companion)? {
                    keys.push(companion);
                }
            }
        }
        keys.sort();
        keys.dedup();
        for path in write_deletion_manifest(&keys, manifest)? {
            println!("wrote {}", path.display());
        }
    }

    Ok(if report.corrupted.is_empty() {
        Status::Success
    } else {
        Status::ValidationFailed
    })
}
