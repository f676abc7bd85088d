//! ArchiveExtractor - アップロードされたアーカイブの展開
//!
//! # フロー
//! 1. 先頭バイトで形式を判定（zip / gzip tarball）
//! 2. リクエストごとに新しい一時ディレクトリ（`unzip*`）を作成
//! 3. blocking pool で全エントリを相対パスのまま展開
//! 4. 成功: 展開先を info 行で記録 / 失敗: ERROR 行を記録して `Failed`
//!
//! 失敗は dispatcher に返さず、ログ行だけで伝えます。

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::RequestId;
use crate::ports::LogStore;

use super::stream_cache::StreamCache;

const EXTRACT_PREFIX: &str = "unzip";

/// Archive formats recognised by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Sniff the format. Anything unrecognised is handed to the zip reader,
    /// which then reports why it is not a zip.
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(&[0x1f, 0x8b]) {
            ArchiveFormat::TarGz
        } else {
            ArchiveFormat::Zip
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("could not read zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("could not read gzip archive: {0}")]
    TarGz(#[source] io::Error),

    #[error("could not prepare extraction directory: {0}")]
    Io(#[from] io::Error),

    #[error("extraction task failed: {0}")]
    Join(String),
}

/// A project unpacked into its own temp directory. Deleted on drop.
#[derive(Debug)]
pub struct ExtractedProject {
    dir: TempDir,
}

impl ExtractedProject {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn dir_name(&self) -> String {
        self.dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub enum Extraction {
    Extracted(ExtractedProject),
    Failed,
}

pub struct ArchiveExtractor {
    logs: Arc<dyn LogStore>,
    work_dir: Option<PathBuf>,
}

impl ArchiveExtractor {
    pub fn new(logs: Arc<dyn LogStore>, work_dir: Option<PathBuf>) -> Self {
        Self { logs, work_dir }
    }

    /// Unpack the cached upload for `request`. Outcome is logged, never raised.
    pub async fn extract(&self, cache: &StreamCache, request: RequestId) -> Extraction {
        let source = cache.path().to_path_buf();
        let work_dir = self.work_dir.clone();
        let result = tokio::task::spawn_blocking(move || unpack(&source, work_dir.as_deref()))
            .await
            .unwrap_or_else(|e| Err(ArchiveError::Join(e.to_string())));

        match result {
            Ok(project) => {
                let msg = format!("Zip archive content uncompressed in {}", project.dir_name());
                info!(request = %request, dir = %project.path().display(), "{msg}");
                if let Err(e) = self.logs.append(request, &msg).await {
                    warn!(request = %request, error = %e, "could not record extraction");
                }
                Extraction::Extracted(project)
            }
            Err(err) => {
                warn!(request = %request, error = %err, "could not read archive");
                if let Err(e) = self.logs.append_error(request, &err).await {
                    warn!(request = %request, error = %e, "could not record extraction failure");
                }
                Extraction::Failed
            }
        }
    }
}

/// Blocking part: sniff, create the target dir, unpack everything into it.
fn unpack(source: &Path, work_dir: Option<&Path>) -> Result<ExtractedProject, ArchiveError> {
    let mut head = [0u8; 4];
    let read = File::open(source)?.read(&mut head)?;
    let format = ArchiveFormat::detect(&head[..read]);

    let mut builder = tempfile::Builder::new();
    builder.prefix(EXTRACT_PREFIX);
    let dir = match work_dir {
        Some(parent) => builder.tempdir_in(parent)?,
        None => builder.tempdir()?,
    };

    match format {
        ArchiveFormat::Zip => {
            let mut archive = zip::ZipArchive::new(File::open(source)?)?;
            archive.extract(dir.path())?;
        }
        ArchiveFormat::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(File::open(source)?));
            archive.set_preserve_permissions(true);
            archive.unpack(dir.path()).map_err(ArchiveError::TarGz)?;
        }
    }

    Ok(ExtractedProject { dir })
}
