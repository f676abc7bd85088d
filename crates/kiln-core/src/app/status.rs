//! Status - ジョブ状態のレジストリ
//!
//! dispatcher が Queued で登録し、worker が Running / 終端へ進めます。
//! request id の所有者もここで覚えておき、所有者チェックに使います。
//!
//! # 保持期間
//! - 終端に達してから `retention` を過ぎたエントリは次の登録時に掃除される
//! - 掃除は高々 `SWEEP_INTERVAL` に 1 回（登録のたびに全件は見ない）
//! - ログを削除したジョブの終端エントリはその場で忘れる
//! - 忘れた id の再発行は 64 bit の OS 乱数に任せる（衝突は実質起きない）

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::{BuildOutcome, JobState, JobStatus, Principal, RequestId};
use crate::observability::JobCounts;

/// Default time a finished job stays queryable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

const SWEEP_INTERVAL: TimeDelta = TimeDelta::seconds(60);

pub struct StatusRegistry {
    inner: RwLock<Inner>,
    retention: TimeDelta,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<RequestId, JobStatus>,
    last_sweep: Option<DateTime<Utc>>,
}

impl Inner {
    fn sweep(&mut self, now: DateTime<Utc>, retention: TimeDelta) {
        let due = match self.last_sweep {
            Some(last) => now.signed_duration_since(last) >= SWEEP_INTERVAL.min(retention),
            None => true,
        };
        if !due {
            return;
        }
        self.last_sweep = Some(now);

        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return;
        };
        let before = self.jobs.len();
        self.jobs
            .retain(|_, status| !(status.state.is_terminal() && status.updated_at <= cutoff));
        let evicted = before - self.jobs.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.jobs.len(), "expired job statuses evicted");
        }
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Claim `request` for `owner`. `false` if the id is already known.
    pub fn insert_queued(&self, request: RequestId, owner: Principal, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        inner.sweep(now, self.retention);
        match inner.jobs.entry(request) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(JobStatus::queued(request, owner, now));
                true
            }
        }
    }

    /// Forget a claim that never became a job.
    pub(crate) fn remove(&self, request: RequestId) {
        self.inner.write().jobs.remove(&request);
    }

    /// Forget a finished job. Queued and running jobs are kept.
    pub fn forget_terminal(&self, request: RequestId) -> bool {
        let mut inner = self.inner.write();
        match inner.jobs.entry(request) {
            Entry::Occupied(entry) if entry.get().state.is_terminal() => {
                entry.remove();
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, request: RequestId) -> bool {
        self.inner.read().jobs.contains_key(&request)
    }

    pub fn len(&self) -> usize {
        self.inner.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_running(&self, request: RequestId, now: DateTime<Utc>) {
        if let Some(status) = self.inner.write().jobs.get_mut(&request) {
            status.mark_running(now);
        }
    }

    pub fn finish(&self, request: RequestId, outcome: BuildOutcome, now: DateTime<Utc>) {
        if let Some(status) = self.inner.write().jobs.get_mut(&request) {
            status.finish(outcome, now);
        }
    }

    pub fn get(&self, request: RequestId) -> Option<JobStatus> {
        self.inner.read().jobs.get(&request).cloned()
    }

    pub fn owner(&self, request: RequestId) -> Option<Principal> {
        self.inner.read().jobs.get(&request).map(|s| s.owner.clone())
    }

    pub fn counts(&self) -> JobCounts {
        let inner = self.inner.read();
        let mut counts = JobCounts::default();
        for status in inner.jobs.values() {
            match status.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
