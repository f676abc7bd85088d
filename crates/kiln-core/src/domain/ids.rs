//! Domain identifiers.
//!
//! # RequestId
//! ビルドジョブとログ行を結びつける識別子です。
//! 値は `IdGenerator`（OsRng ベース）が払い出すため、推測されにくい整数になります。
//!
//! - **不透明**: クライアントは値の意味を解釈しない
//! - **再利用しない**: 同一プロセス内では dispatcher が重複を引き直す
//! - **整数表現**: routing 層とは 10 進数の文字列でやり取りする

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier of one submitted build request.
///
/// Every log append, read, or delete is keyed by this value.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}
