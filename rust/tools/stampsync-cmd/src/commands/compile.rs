//! Compile command implementation

use anyhow::Result;
use clap::Args;
use stampsync::{
    CompileOptions, Compiler,
    compile::{DEFAULT_FILE_PATTERN, DEFAULT_ID_PATTERN},
};
use stampsync_records::transform::{Chain, Identity, KeyFilter, KeyProjection};

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_location, parse_uri},
};

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// JSON lines naming the wanted records: an s3:// URI or a local path
    pub ids: String,

    /// Remote prefix holding the corpus files (s3://bucket/prefix/)
    pub prefix: String,

    /// Output: an s3:// URI or a local path; the extension selects the compression
    #[arg(long, short)]
    pub output: String,

    /// Identifier field of the input records
    #[arg(long, default_value = "id")]
    pub id_field: String,

    /// Regular expression splitting an id into newspaper, year and content id
    #[arg(long, default_value = DEFAULT_ID_PATTERN)]
    pub id_pattern: String,

    /// File name template over {newspaper}, {year}, {content_id} and {id}
    #[arg(long, default_value = DEFAULT_FILE_PATTERN)]
    pub file_pattern: String,

    /// Identifier field of the corpus records
    #[arg(long, default_value = "id")]
    pub match_field: String,

    /// Keep compiled records whose key has this value, e.g. `lg=fr`
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Keep only these top-level keys of each compiled record
    #[arg(long = "keys", value_delimiter = ',')]
    pub keys: Vec<String>,
}

fn build_transform(args: &CompileArgs) -> Result<Chain> {
    let mut chain = Chain::new();
    if !args.filters.is_empty() {
        chain = chain.then(KeyFilter::parse(&args.filters)?);
    }
    if !args.keys.is_empty() {
        chain = chain.then(KeyProjection::new(args.keys.clone()));
    }
    if chain.is_empty() {
        chain = chain.then(Identity);
    }
    Ok(chain)
}

pub fn run(global: &GlobalArgs, args: CompileArgs) -> Result<Status> {
    let config = load_config(global)?;
    let ids = parse_location(&args.ids)?;
    let prefix = parse_uri(&args.prefix)?;
    let output = parse_location(&args.output)?;
    let options = CompileOptions::new(
        &args.id_field,
        &args.id_pattern,
        &args.file_pattern,
        &args.match_field,
    )?;
    let mut transform = build_transform(&args)?;

    let report = Compiler::new(open_store(&config)?).compile(
        &ids,
        &prefix,
        &options,
        &mut transform,
        &output,
    )?;
    println!(
        "{} of {} ids found, {} records written ({} missing files)",
        report.found_records, report.parsed_ids, report.records_written, report.missing_files
    );
    Ok(Status::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_args(ids: &str, output: &str, extra: &[&str]) -> CompileArgs {
        #[derive(clap::Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: CompileArgs,
        }
        let mut argv = vec!["compile", ids, "s3://corpus/run/", "--output", output];
        argv.extend_from_slice(extra);
        <Wrapper as clap::Parser>::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_compile_projects_found_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir_all(store.join("corpus/run")).unwrap();
        std::fs::write(
            store.join("corpus/run/GDL-1900.jsonl"),
            concat!(
                "{\"id\": \"GDL-1900-a\", \"ft\": \"first\"}\n",
                "{\"id\": \"GDL-1900-b\", \"ft\": \"second\"}\n",
            ),
        )
        .unwrap();
        let ids = dir.path().join("ids.jsonl");
        std::fs::write(&ids, "{\"id\": \"GDL-1900-b\"}\n{\"id\": \"JDG-1850-z\"}\n").unwrap();
        let output = dir.path().join("out.jsonl");
        let global = GlobalArgs {
            store_root: Some(store),
            ..GlobalArgs::default()
        };

        let args = compile_args(
            &ids.display().to_string(),
            &output.display().to_string(),
            &["--file-pattern", "{newspaper}-{year}.jsonl", "--keys", "ft"],
        );
        assert_eq!(run(&global, args).unwrap(), Status::Success);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "{\"ft\":\"second\",\"id\":\"GDL-1900-b\"}\n"
        );
    }

    #[test]
    fn test_invalid_id_pattern_is_an_error() {
        let global = GlobalArgs::default();
        let args = compile_args("ids.jsonl", "out.jsonl", &["--id-pattern", "^(\\w+)$"]);
        assert!(run(&global, args).is_err());
    }
}
