use swivel_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("engine error: {0}")]
    Core(#[from] CoreError),

    #[error("backend slot {0} configured more than once")]
    DuplicateSlot(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("raw packet sockets are not supported on this platform")]
    Unsupported,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("system error: {0}")]
    System(#[from] nix::errno::Errno),
}
