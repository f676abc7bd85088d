//! IdGenerator port - RequestId 生成の抽象化
//!
//! RequestId はログの鍵であり、所有者との紐付けがない構成では
//! 推測されると他人のログを読めてしまいます。
//! そのため本番用の生成器は OS の暗号論的乱数源を使います。
//!
//! # 実装
//! - **OsRngIdGenerator**: `rand::rngs::OsRng` ベース（本番用）

use rand::RngCore;
use rand::rngs::OsRng;

use crate::domain::RequestId;

/// IdGenerator は推測されにくい RequestId を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（dispatcher が複数タスクから使う）
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> RequestId;
}

/// OsRngIdGenerator は OS の乱数源から 64-bit を引く
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngIdGenerator;

impl IdGenerator for OsRngIdGenerator {
    fn generate(&self) -> RequestId {
        RequestId::new(OsRng.next_u64())
    }
}
