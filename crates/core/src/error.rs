use thiserror::Error;

/// Errors raised by the thread service and its configuration layer.
#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("Exceeded ThreadPool max: pool {pool} is capped at {capacity} threads")]
    PoolExhausted { pool: String, capacity: usize },

    #[error("thread pool {0} has been stopped")]
    PoolStopped(String),

    #[error("pooled thread {0} is already running")]
    WorkerBusy(String),

    #[error("failed to spawn pooled thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("more than one suspend callback for {0}")]
    SuspendPending(String),

    #[error("unknown tree node: {0}")]
    NodeNotFound(usize),

    #[error("{0} is not supported by the {1} thread service")]
    Unsupported(&'static str, &'static str),

    #[error("thread service has been shut down")]
    ShutDown,

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {path}: {source}")]
    ConfigIo {
        path: String,
        source: std::io::Error,
    },
}
