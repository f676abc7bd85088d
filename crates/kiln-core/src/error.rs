use thiserror::Error;

use crate::domain::RequestId;
use crate::ports::StoreError;

/// ErrorKind は失敗の運用分類
///
/// - Fatal: その操作は失敗として呼び出し元に返す
/// - Retryable: 同じ操作を後で再試行すれば通る可能性がある
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    Retryable,
}

/// Errors surfaced to the caller of the service API.
///
/// Background job failures never appear here; they only become log lines.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error("invalid credentials")]
    Unauthorized,

    #[error("request {0} belongs to another principal")]
    Forbidden(RequestId),

    #[error("build queue is full ({capacity} jobs waiting)")]
    Saturated { capacity: usize },

    #[error("could not read uploaded stream: {0}")]
    Stream(#[source] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

impl KilnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KilnError::Saturated { .. } => ErrorKind::Retryable,
            KilnError::Store(e) => e.kind(),
            _ => ErrorKind::Fatal,
        }
    }
}
