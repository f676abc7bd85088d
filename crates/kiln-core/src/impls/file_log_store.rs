//! FileLogStore - 永続ログストア
//!
//! request id ごとに `<dir>/<id>.jsonl` を 1 ファイル持ちます。
//! 1 行 = 1 `LogEntry`（JSON）。
//!
//! # 実装詳細
//! - request id ごとの `tokio::sync::Mutex` で append / delete を直列化
//! - 次の position はファイルの行数から遅延ロードしてキャッシュ
//! - slot を作るのは append だけ。delete は誰も待っていなければ slot を捨てる
//!   （slot の数はディスク上のログファイルの数を超えない）
//! - ファイルがなければ空のログとして扱う
//! - 改行で終わらない末尾は書きかけとみなして読まない

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::domain::{LogEntry, RequestId};
use crate::ports::{Clock, LogStore, StoreError, SystemClock};

/// Next position to hand out; `None` until the file has been counted.
type Slot = Arc<tokio::sync::Mutex<Option<u64>>>;

pub struct FileLogStore {
    dir: PathBuf,
    slots: Mutex<HashMap<RequestId, Slot>>,
    clock: Arc<dyn Clock>,
}

impl FileLogStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(dir, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            slots: Mutex::new(HashMap::new()),
            clock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, request: RequestId) -> PathBuf {
        self.dir.join(format!("{request}.jsonl"))
    }

    fn slot(&self, request: RequestId) -> Slot {
        Arc::clone(self.slots.lock().entry(request).or_default())
    }

    fn existing_slot(&self, request: RequestId) -> Option<Slot> {
        self.slots.lock().get(&request).map(Arc::clone)
    }

    /// Drop the slot unless another task cloned it in the meantime.
    fn release_slot(&self, request: RequestId, slot: &Slot) {
        let mut slots = self.slots.lock();
        // map + caller
        if Arc::strong_count(slot) == 2 {
            slots.remove(&request);
        }
    }

    #[cfg(test)]
    fn tracked_slots(&self) -> usize {
        self.slots.lock().len()
    }

    async fn load(&self, request: RequestId) -> Result<Vec<LogEntry>, StoreError> {
        let text = match tokio::fs::read_to_string(self.path_for(request)).await {
            Ok(text) => text,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let complete = match text.rfind('\n') {
            Some(end) => &text[..=end],
            None => "",
        };
        complete
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(n, l)| {
                serde_json::from_str::<LogEntry>(l).map_err(|source| StoreError::Corrupt {
                    request,
                    line: n + 1,
                    source,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn append(&self, request: RequestId, line: &str) -> Result<(), StoreError> {
        let slot = self.slot(request);
        let mut next = slot.lock().await;
        let position = match *next {
            Some(p) => p,
            None => self.load(request).await?.len() as u64,
        };

        let entry = LogEntry::new(request, position, line, self.clock.now());
        let mut record = serde_json::to_vec(&entry).map_err(|source| StoreError::Corrupt {
            request,
            line: position as usize + 1,
            source,
        })?;
        record.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(request))
            .await?;
        // 1 回の write_all で 1 行を書く
        file.write_all(&record).await?;
        file.flush().await?;

        *next = Some(position + 1);
        Ok(())
    }

    async fn entries(&self, request: RequestId) -> Result<Vec<LogEntry>, StoreError> {
        let mut entries = match self.existing_slot(request) {
            Some(slot) => {
                let _guard = slot.lock().await;
                self.load(request).await?
            }
            None => self.load(request).await?,
        };
        entries.sort_by_key(|e| e.position);
        Ok(entries)
    }

    async fn delete(&self, request: RequestId) -> Result<usize, StoreError> {
        let slot = self.slot(request);
        let mut next = slot.lock().await;
        let count = self.load(request).await?.len();
        match tokio::fs::remove_file(self.path_for(request)).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *next = Some(0);
        self.release_slot(request, &slot);
        Ok(count)
    }
}
