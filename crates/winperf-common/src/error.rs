use thiserror::Error;

use crate::types::NativeCode;

#[derive(Debug, Error)]
pub enum WinperfError {
    #[error("failed to collect query data for {host}: {code}")]
    CollectFailed { host: String, code: NativeCode },
    #[error("metric already registered: {0}")]
    AlreadyRegistered(String),
    #[error("registry error: {0}")]
    Registry(#[from] prometheus::Error),
    #[error("unknown number of segments in counter path: {0}")]
    UnknownPathShape(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WinperfError>;
