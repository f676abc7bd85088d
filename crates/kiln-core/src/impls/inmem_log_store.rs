//! InMemoryLogStore - 開発・テスト用のログストア
//!
//! # 実装詳細
//! - request id ごとの行列は個別の `Mutex` で守る
//! - append は外側の read ロックを保持したまま push する（新しい id のときだけ write）
//! - delete は外側の write ロックで取り除くので、push 中の append とは交差しない
//! - 別 request の append 同士は read ロックを共有するので互いを止めない

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::domain::{LogEntry, RequestId};
use crate::ports::{Clock, LogStore, StoreError, SystemClock};

type Lines = Arc<Mutex<Vec<LogEntry>>>;

/// InMemoryLogStore はプロセス内にログを保持
///
/// # 使用例
/// ```ignore
/// let store = InMemoryLogStore::new();
/// store.append(id, "hello").await?;
/// assert_eq!(store.read(id).await?, "hello");
/// ```
pub struct InMemoryLogStore {
    logs: RwLock<HashMap<RequestId, Lines>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn push(&self, lines: &Mutex<Vec<LogEntry>>, request: RequestId, line: &str) {
        let mut lines = lines.lock();
        let position = lines.len() as u64;
        lines.push(LogEntry::new(request, position, line, self.clock.now()));
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, request: RequestId, line: &str) -> Result<(), StoreError> {
        {
            let logs = self.logs.read();
            if let Some(lines) = logs.get(&request) {
                self.push(lines, request, line);
                return Ok(());
            }
        }
        let mut logs = self.logs.write();
        self.push(logs.entry(request).or_default(), request, line);
        Ok(())
    }

    async fn entries(&self, request: RequestId) -> Result<Vec<LogEntry>, StoreError> {
        let lines = self.logs.read().get(&request).map(Arc::clone);
        Ok(lines.map(|l| l.lock().clone()).unwrap_or_default())
    }

    async fn delete(&self, request: RequestId) -> Result<usize, StoreError> {
        let removed = self.logs.write().remove(&request);
        Ok(removed.map(|l| l.lock().len()).unwrap_or(0))
    }
}
