//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（ログの永続化先、乱数源、認証ゲートなど）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod authenticator;
pub mod clock;
pub mod id_generator;
pub mod log_store;

// 主要な trait を再エクスポート
pub use self::authenticator::{Authenticator, StaticAuthenticator};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, OsRngIdGenerator};
pub use self::log_store::{LogStore, StoreError};
