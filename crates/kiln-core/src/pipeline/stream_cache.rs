//! StreamCache - 受信ストリームの一時保存
//!
//! アップロードされたバイト列を一度だけ一時ファイルに書き出し、
//! 何度でも先頭から読めるようにします。
//!
//! # ライフサイクル
//! - dispatcher が受付時に作成（書き込み失敗は受付失敗）
//! - extractor が `path()` / `reader()` で読む
//! - ジョブ終了時に drop され、一時ファイルも消える

use std::fs::File;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};

const TEMP_PREFIX: &str = "temp";
const TEMP_SUFFIX: &str = ".strm";

/// Upload bytes held in a temporary file. Read-only after construction.
#[derive(Debug)]
pub struct StreamCache {
    file: NamedTempFile,
    len: u64,
}

impl StreamCache {
    /// Drain `stream` into a new temp file under `dir` (system temp when `None`).
    pub async fn capture<R>(stream: &mut R, dir: Option<&Path>) -> io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(TEMP_SUFFIX);
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut out = tokio::fs::File::from_std(file.as_file().try_clone()?);
        let len = tokio::io::copy(stream, &mut out).await?;
        out.flush().await?;
        out.sync_all().await?;

        Ok(Self { file, len })
    }

    /// A fresh reader positioned at the first byte. Each call is independent.
    pub fn reader(&self) -> io::Result<File> {
        self.file.reopen()
    }

    /// Backing file, for consumers that need random access.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
