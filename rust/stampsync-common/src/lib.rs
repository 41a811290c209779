//! Core definitions (error taxonomy, result helpers), relied upon by all stampsync-* crates.

pub mod error;
pub mod macros;
pub mod result;

#[cfg(feature = "tokio")]
pub mod async_runtime;

pub use result::Result;
