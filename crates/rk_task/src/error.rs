use std::io;

use thiserror::Error;

/// Errors reported by [`UnboundedQueueExecutor`](crate::UnboundedQueueExecutor).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    #[error("executor has been shut down")]
    Shutdown,

    #[error("failed to spawn worker thread `{name}`")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
