//! App - アプリケーション層
//!
//! このモジュールは、ports と pipeline を組み合わせてジョブの流れを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定からのワイヤリングと起動時検証
//! - **JobDispatcher**: 受付（id 発行、ストリーム退避、キュー投入）
//! - **WorkerGroup**: 有界ワーカープール（展開 → ビルド）
//! - **StatusRegistry**: ジョブ状態と所有者
//! - **BuildService**: routing 層が呼ぶ API

pub mod builder;
pub mod dispatcher;
pub mod service;
pub mod status;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::dispatcher::{BuildJob, JOB_STARTED, JobDispatcher};
pub use self::service::BuildService;
pub use self::status::StatusRegistry;
pub use self::worker_pool::{JobRunner, PipelineRunner, WorkerGroup};
