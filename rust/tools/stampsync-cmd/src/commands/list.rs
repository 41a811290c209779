//! List and exists command implementations

use anyhow::{Context, Result};
use stampsync::reconcile::list_objects;

use crate::{
    GlobalArgs,
    commands::{Status, load_config, open_store, parse_uri},
};

pub fn run(global: &GlobalArgs, prefix: String, glob: Option<String>) -> Result<Status> {
    let config = load_config(global)?;
    let prefix = parse_uri(&prefix)?;
    let store = open_store(&config)?;
    for uri in list_objects(store.as_ref(), &prefix, glob.as_deref())? {
        println!("{uri}");
    }
    Ok(Status::Success)
}

pub fn exists(global: &GlobalArgs, uri: String) -> Result<Status> {
    let config = load_config(global)?;
    let uri = parse_uri(&uri)?;
    let store = open_store(&config)?;
    let found = store
        .exists(&uri)
        .with_context(|| format!("Failed to check {uri}"))?;
    if found {
        println!("{uri}");
        Ok(Status::Success)
    } else {
        log::info!("{uri} does not exist");
        Ok(Status::Failure)
    }
}
