//! State - ジョブの状態
//!
//! ログ行の有無だけでは完了を判定しづらいため、明示的な状態を持ちます。
//! ログベースの観測はそのまま残ります（状態は追加情報）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RequestId;
use super::outcome::BuildOutcome;
use super::principal::Principal;

/// JobState はビルドジョブの状態を表現
///
/// # 状態遷移
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted and waiting for a worker.
    Queued,

    /// A worker is extracting or building.
    Running,

    /// The build tool ran and exited with code 0.
    Succeeded,

    /// Anything else. See `BuildOutcome` for the reason.
    Failed,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Job status for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub request: RequestId,
    pub owner: Principal,
    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BuildOutcome>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn queued(request: RequestId, owner: Principal, now: DateTime<Utc>) -> Self {
        Self {
            request,
            owner,
            state: JobState::Queued,
            outcome: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Running;
        self.updated_at = now;
    }

    pub fn finish(&mut self, outcome: BuildOutcome, now: DateTime<Utc>) {
        self.state = outcome.final_state();
        self.outcome = Some(outcome);
        self.updated_at = now;
    }
}
