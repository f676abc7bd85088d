//! kiln-core
//!
//! Core building blocks for the Kiln build-job pipeline.
//!
//! アップロードされたプロジェクトのアーカイブを受け取り、バックグラウンドで
//! 展開してビルドツールを走らせ、その出力を request id ごとのログとして残します。
//! 呼び出し元は id を受け取ってすぐ戻り、あとからログと状態をポーリングします。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, principal, log, state, outcome）
//! - **ports**: 抽象化レイヤー（LogStore, Clock, IdGenerator, Authenticator）
//! - **impls**: 実装（InMemoryLogStore, FileLogStore）
//! - **pipeline**: ジョブのステージ（StreamCache, ArchiveExtractor, BuildRunner）
//! - **app**: アプリケーションロジック（builder, dispatcher, worker_pool, service）
//! - **config**: TOML 設定と `KILN_*` 環境変数
//! - **observability**: tracing の初期化とジョブ集計

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod pipeline;
pub mod ports;

pub use crate::app::{App, AppBuilder, BuildError, BuildService};
pub use crate::config::KilnConfig;
pub use crate::error::{ErrorKind, KilnError};
