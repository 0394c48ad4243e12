//! Thin shim over the async runtime used by the bridge adapters.

use std::future::Future;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Runs a blocking closure on the runtime's blocking pool and awaits its
/// completion. Must be called from within an async context.
pub(crate) async fn spawn_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))
}

/// Blocks the current thread on a future, driving it on a process-global
/// runtime. Must not be called from within an async context.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    global().block_on(future)
}

fn global() -> &'static tokio::runtime::Runtime {
    static GLOBAL: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("failed to build global runtime")
    })
}
