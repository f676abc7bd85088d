//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryLogStore**: 開発・テスト用のログストア
//! - **FileLogStore**: JSON Lines ファイルによる永続ログストア

pub mod file_log_store;
pub mod inmem_log_store;

// 主要な型を再エクスポート
pub use self::file_log_store::FileLogStore;
pub use self::inmem_log_store::InMemoryLogStore;
