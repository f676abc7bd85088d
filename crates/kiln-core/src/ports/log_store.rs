//! LogStore port - リクエストごとの追記専用ログ
//!
//! LogStore は以下を提供します：
//! - append（情報行 / エラー行）
//! - read（古い順に連結）
//! - delete（リクエスト単位の一括削除）
//!
//! # 実装
//! - **InMemoryLogStore**: 開発・テスト用
//! - **FileLogStore**: リクエストごとの JSON Lines ファイル（永続）

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{LogEntry, RequestId, error_line, join_lines};
use crate::error::ErrorKind;

/// Storage-layer failures. Always surfaced to the caller of the log API.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("log storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("log for request {request} is corrupt at line {line}: {source}")]
    Corrupt {
        request: RequestId,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("log storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Fatal-vs-retryable classification at the storage boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io(e) => match e.kind() {
                std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut => ErrorKind::Retryable,
                _ => ErrorKind::Fatal,
            },
            StoreError::Corrupt { .. } => ErrorKind::Fatal,
            StoreError::Unavailable(_) => ErrorKind::Retryable,
        }
    }
}

/// LogStore は request id ごとに順序付きのログ行を保持
///
/// # 設計原則
/// - 1 回の append はアトミック
/// - 同一 request id の行は append 順に読める
/// - 異なる request id 間の順序保証はない
/// - 未知の request id は空として扱う（エラーではない）
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one line to the log of `request`.
    async fn append(&self, request: RequestId, line: &str) -> Result<(), StoreError>;

    /// Append an error as a single `ERROR: <message>` line.
    async fn append_error(
        &self,
        request: RequestId,
        error: &(dyn fmt::Display + Send + Sync),
    ) -> Result<(), StoreError> {
        self.append(request, &error_line(error)).await
    }

    /// All entries of `request`, oldest first.
    async fn entries(&self, request: RequestId) -> Result<Vec<LogEntry>, StoreError>;

    /// The log of `request` joined with `LINE_SEPARATOR`.
    async fn read(&self, request: RequestId) -> Result<String, StoreError> {
        let entries = self.entries(request).await?;
        Ok(join_lines(&entries))
    }

    /// Remove every line of `request`, returning how many were removed.
    async fn delete(&self, request: RequestId) -> Result<usize, StoreError>;
}
