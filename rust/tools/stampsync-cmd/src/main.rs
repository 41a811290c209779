use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};

mod commands;
mod logging;

use commands::Status;

#[derive(Parser)]
#[command(name = "stampsync")]
#[command(about = "Reconciles local build stamps with an object store and guards pipeline outputs")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// JSON configuration file; command-line options override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local directory mirroring the remote buckets
    #[arg(long, global = true, env = "STAMPSYNC_BUILD_ROOT")]
    build_root: Option<PathBuf>,

    /// Fixed bucket: local paths under the build root carry no bucket directory
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Use a local directory as the object store instead of S3
    #[arg(long, global = true, env = "STAMPSYNC_STORE_ROOT")]
    store_root: Option<PathBuf>,

    /// S3 endpoint URL
    #[arg(long, global = true, env = "SE_HOST_URL")]
    endpoint: Option<String>,

    #[arg(long, global = true, env = "SE_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    #[arg(long, global = true, env = "SE_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Log filter (e.g. `info`, `debug`, `stampsync=trace`); RUST_LOG overrides it
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also append log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the objects under a remote prefix into local stamps
    Reconcile(commands::reconcile::ReconcileArgs),

    /// List the objects under a remote prefix
    List {
        /// Remote prefix (s3://bucket/prefix/)
        prefix: String,

        /// Glob over the full key (e.g. `run/*.jsonl.bz2`)
        #[arg(long)]
        glob: Option<String>,
    },

    /// Exit with 0 if the remote object exists, 1 otherwise
    Exists {
        /// Remote object (s3://bucket/key)
        uri: String,
    },

    /// Place a work claim on a target before processing it
    Claim(commands::claim::ClaimArgs),

    /// Remove the work claim of a target
    Release {
        /// Remote target the claim was placed on
        target: String,
    },

    /// Validate and publish a local output, then shrink it to a stamp
    Finalize(commands::finalize::FinalizeArgs),

    /// Decode every object under a prefix and report the corrupted ones
    Verify(commands::verify::VerifyArgs),

    /// Merge the records under a prefix into one output
    Aggregate(commands::aggregate::AggregateArgs),

    /// Record the time of the latest content as metadata of remote objects
    SetTimestamp(commands::set_timestamp::SetTimestampArgs),

    /// Write the record identifiers found under both of two prefixes
    Compare(commands::compare::CompareArgs),

    /// Collect the records named by a list of identifiers from the corpus files
    Compile(commands::compile::CompileArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.global.log_level, cli.global.log_file.as_deref()) {
        eprintln!("{e:#}");
        return Status::Failure.into();
    }

    let result = match cli.command {
        Commands::Reconcile(args) => commands::reconcile::run(&cli.global, args),
        Commands::List { prefix, glob } => commands::list::run(&cli.global, prefix, glob),
        Commands::Exists { uri } => commands::list::exists(&cli.global, uri),
        Commands::Claim(args) => commands::claim::run(&cli.global, args),
        Commands::Release { target } => commands::claim::release(&cli.global, target),
        Commands::Finalize(args) => commands::finalize::run(&cli.global, args),
        Commands::Verify(args) => commands::verify::run(&cli.global, args),
        Commands::Aggregate(args) => commands::aggregate::run(&cli.global, args),
        Commands::SetTimestamp(args) => commands::set_timestamp::run(&cli.global, args),
        Commands::Compare(args) => commands::compare::run(&cli.global, args),
        Commands::Compile(args) => commands::compile::run(&cli.global, args),
    };

    match result {
        Ok(status) => status.into(),
        Err(e) => {
            log::error!("{e:#}");
            Status::Failure.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stampsync",
            "reconcile",
            "s3://corpus/run/",
            "--build-root",
            "/data/build",
            "--directory-level",
            "1",
        ])
        .unwrap();
        assert_eq!(cli.global.build_root, Some(PathBuf::from("/data/build")));
        match cli.command {
            Commands::Reconcile(args) => assert_eq!(args.directory_level, Some(1)),
            _ => panic!("expected reconcile"),
        }
    }

    #[test]
    fn test_finalize_timestamp_flags_require_set_timestamp() {
        let err = Cli::try_parse_from(["stampsync", "finalize", "out.jsonl", "--ts-key", "cdt"])
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 2);

        let cli = Cli::try_parse_from([
            "stampsync",
            "finalize",
            "out.jsonl",
            "--set-timestamp",
            "--ts-key",
            "__file__",
            "--layout",
            "provider",
        ])
        .unwrap();
        match cli.command {
            Commands::Finalize(args) => {
                assert!(args.set_timestamp);
                assert_eq!(args.ts_key, "__file__");
                assert_eq!(args.layout, Some(commands::finalize::LayoutArg::Provider));
            }
            _ => panic!("expected finalize"),
        }
    }

    #[test]
    fn test_missing_argument_is_a_usage_error() {
        let err = Cli::try_parse_from(["stampsync", "claim"]).err().unwrap();
        assert_eq!(err.exit_code(), 2);
    }
}
