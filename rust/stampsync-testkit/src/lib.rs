//! Test utilities for the stampsync crates.
//!
//! - Temporary build trees (a build root next to a local store root)
//! - Store fixtures with controlled modification times
//! - Synthetic newspaper corpora as compressed JSON lines

pub mod data_gen;
pub mod dirs;
pub mod fixtures;
