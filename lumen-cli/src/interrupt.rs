use std::future::Future;

use anyhow::Result;
use tokio::task::JoinHandle;

/// Waits for `worker` unless `interrupt` resolves first, in which case `None`
/// is returned and the worker is left running.
pub async fn finish_unless_interrupted<T>(
    worker: JoinHandle<Result<T>>,
    interrupt: impl Future<Output = ()>,
) -> Option<Result<T>> {
    tokio::select! {
        result = worker => Some(result.map_err(anyhow::Error::from).and_then(|r| r)),
        _ = interrupt => None,
    }
}

/// Resolves on the next Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn next_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
