//! Pipeline - バックグラウンドジョブの各ステージ
//!
//! # ステージ
//! - **StreamCache**: 受信ストリームを一時ファイルへ退避
//! - **ArchiveExtractor**: アーカイブを新しい一時ディレクトリへ展開
//! - **find_descriptor**: 展開ツリーから build descriptor を探す
//! - **BuildRunner**: ビルドツールを起動し出力を LogStore へ流す
//!
//! どのステージも失敗を呼び出し元へ返さず、LogStore の行として残します。

pub mod archive;
pub mod build_runner;
pub mod descriptor;
pub mod stream_cache;

#[cfg(test)]
pub(crate) mod test_archives;

pub use self::archive::{ArchiveError, ArchiveExtractor, ArchiveFormat, ExtractedProject, Extraction};
pub use self::build_runner::{BuildRunner, RunnerError};
pub use self::descriptor::find_descriptor;
pub use self::stream_cache::StreamCache;
