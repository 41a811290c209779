//! Blocking bridge to the async runtime used by network store backends.
//! **Note**: the store API is synchronous; backends built on async clients own
//! a private current-thread runtime and drive each request to completion.

use std::future::Future;

pub struct BlockingRuntime {
    runtime: tokio::runtime::Runtime,
}

impl BlockingRuntime {
    pub fn new() -> std::io::Result<BlockingRuntime> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(BlockingRuntime { runtime })
    }

    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        self.runtime.block_on(f)
    }
}
