//! WorkerGroup - 有界ワーカープール
//!
//! - `n` 個のワーカーが 1 本の有界キューを共有する
//! - 1 ジョブ = 1 spawn。panic はジョブ単位で捕まえ、ワーカーは止まらない
//! - shutdown は新しいジョブの取り出しを止めるだけで、実行中のビルドは最後まで走る
//! - shutdown 時にキューに残っていたジョブは `Cancelled` で終える
//! - 枠を予約済みの submit（アップロード読み込み中）も送り終えるまで待ってから取り消す

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{BuildOutcome, RequestId};
use crate::error::KilnError;
use crate::pipeline::{ArchiveExtractor, BuildRunner, Extraction};
use crate::ports::{Clock, LogStore};

use super::dispatcher::BuildJob;
use super::status::StatusRegistry;

/// Runs one job to its outcome. Failures are written to the log, not returned.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: BuildJob) -> BuildOutcome;
}

/// Extract, then build.
pub struct PipelineRunner {
    extractor: ArchiveExtractor,
    builder: BuildRunner,
}

impl PipelineRunner {
    pub fn new(extractor: ArchiveExtractor, builder: BuildRunner) -> Self {
        Self { extractor, builder }
    }
}

#[async_trait]
impl JobRunner for PipelineRunner {
    async fn run(&self, job: BuildJob) -> BuildOutcome {
        let BuildJob { request, cache } = job;
        let extraction = self.extractor.extract(&cache, request).await;
        drop(cache);

        match extraction {
            Extraction::Extracted(project) => self.builder.run(project.path(), request).await,
            Extraction::Failed => BuildOutcome::ExtractionFailed,
        }
    }
}

/// Shared by every worker.
struct WorkerContext {
    jobs: Mutex<mpsc::Receiver<BuildJob>>,
    runner: Arc<dyn JobRunner>,
    logs: Arc<dyn LogStore>,
    registry: Arc<StatusRegistry>,
    clock: Arc<dyn Clock>,
}

/// Worker group handle.
/// - `request_shutdown()` で全ワーカーが新しいジョブを取らなくなる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    ctx: Arc<WorkerContext>,
}

impl WorkerGroup {
    /// Spawn `n` workers draining `jobs`.
    pub fn spawn(
        n: usize,
        jobs: mpsc::Receiver<BuildJob>,
        runner: Arc<dyn JobRunner>,
        logs: Arc<dyn LogStore>,
        registry: Arc<StatusRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(WorkerContext {
            jobs: Mutex::new(jobs),
            runner,
            logs,
            registry,
            clock,
        });

        let joins = (0..n)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, ctx, rx))
            })
            .collect();

        info!(workers = n, "worker group started");
        Self {
            shutdown_tx,
            joins,
            ctx,
        }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// Stop taking new jobs. In-flight builds are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown, wait for in-flight jobs, then cancel whatever is still queued.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task failed");
            }
        }

        let mut jobs = self.ctx.jobs.lock().await;
        jobs.close();
        // close 後の recv は予約済みの枠がすべて送信か破棄されるまで None を返さない
        while let Some(job) = jobs.recv().await {
            cancel(&self.ctx, job.request).await;
        }
        info!("worker group stopped");
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 受信待ちは shutdown と競合させる
        let job = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            job = next_job(&ctx) => job,
        };

        let Some(job) = job else {
            // dispatcher が消えた
            break;
        };
        run_job(worker_id, &ctx, job).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn next_job(ctx: &WorkerContext) -> Option<BuildJob> {
    ctx.jobs.lock().await.recv().await
}

async fn run_job(worker_id: usize, ctx: &WorkerContext, job: BuildJob) {
    let request = job.request;
    ctx.registry.mark_running(request, ctx.clock.now());
    info!(worker_id, request = %request, "build job running");

    let runner = Arc::clone(&ctx.runner);
    let outcome = match tokio::spawn(async move { runner.run(job).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(worker_id, request = %request, error = %e, "build job crashed");
            let msg = format!("build job crashed: {e}");
            if let Err(e) = ctx.logs.append_error(request, &msg).await {
                warn!(request = %request, error = %e, "could not record crash");
            }
            BuildOutcome::Crashed
        }
    };

    ctx.registry.finish(request, outcome, ctx.clock.now());
    info!(worker_id, request = %request, outcome = ?outcome, "build job finished");
}

async fn cancel(ctx: &WorkerContext, request: RequestId) {
    warn!(request = %request, "cancelling queued build job");
    if let Err(e) = ctx.logs.append_error(request, &KilnError::ShuttingDown).await {
        warn!(request = %request, error = %e, "could not record cancellation");
    }
    ctx.registry.finish(request, BuildOutcome::Cancelled, ctx.clock.now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobState, Principal};
    use crate::impls::InMemoryLogStore;
    use crate::pipeline::StreamCache;
    use crate::ports::SystemClock;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Panics on request 13, otherwise finishes with exit code 0.
    struct ScriptedRunner;

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run(&self, job: BuildJob) -> BuildOutcome {
            if job.request == RequestId::new(13) {
                panic!("boom");
            }
            BuildOutcome::Completed { exit_code: Some(0) }
        }
    }

    /// Blocks until released.
    struct GatedRunner(Arc<Notify>);

    #[async_trait]
    impl JobRunner for GatedRunner {
        async fn run(&self, _job: BuildJob) -> BuildOutcome {
            self.0.notified().await;
            BuildOutcome::Completed { exit_code: Some(0) }
        }
    }

    struct Harness {
        tx: mpsc::Sender<BuildJob>,
        logs: Arc<InMemoryLogStore>,
        registry: Arc<StatusRegistry>,
        group: WorkerGroup,
    }

    fn harness(workers: usize, capacity: usize, runner: Arc<dyn JobRunner>) -> Harness {
        let (tx, rx) = mpsc::channel(capacity);
        let logs = Arc::new(InMemoryLogStore::new());
        let registry = Arc::new(StatusRegistry::new());
        let group = WorkerGroup::spawn(
            workers,
            rx,
            runner,
            logs.clone(),
            registry.clone(),
            Arc::new(SystemClock),
        );
        Harness {
            tx,
            logs,
            registry,
            group,
        }
    }

    async fn enqueue(h: &Harness, id: u64) -> RequestId {
        let request = RequestId::new(id);
        h.registry.insert_queued(request, Principal::new("test"), Utc::now());
        let mut bytes: &[u8] = b"";
        let cache = StreamCache::capture(&mut bytes, None).await.unwrap();
        h.tx.send(BuildJob { request, cache }).await.unwrap();
        request
    }

    async fn wait_terminal(registry: &StatusRegistry, request: RequestId) -> JobState {
        for _ in 0..200 {
            if let Some(status) = registry.get(request) {
                if status.state.is_terminal() {
                    return status.state;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {request} did not finish");
    }

    #[tokio::test]
    async fn jobs_run_to_a_terminal_state() {
        let h = harness(2, 8, Arc::new(ScriptedRunner));
        assert_eq!(h.group.size(), 2);
        let ids = [enqueue(&h, 1).await, enqueue(&h, 2).await, enqueue(&h, 3).await];

        for id in ids {
            assert_eq!(wait_terminal(&h.registry, id).await, JobState::Succeeded);
        }
        h.group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn panicking_job_is_logged_and_worker_survives() {
        let h = harness(1, 8, Arc::new(ScriptedRunner));
        let bad = enqueue(&h, 13).await;
        let good = enqueue(&h, 14).await;

        assert_eq!(wait_terminal(&h.registry, bad).await, JobState::Failed);
        assert_eq!(h.registry.get(bad).unwrap().outcome, Some(BuildOutcome::Crashed));
        assert!(h.logs.read(bad).await.unwrap().starts_with("ERROR: build job crashed"));

        assert_eq!(wait_terminal(&h.registry, good).await, JobState::Succeeded);
        h.group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_and_cancels_queued() {
        let gate = Arc::new(Notify::new());
        let h = harness(1, 8, Arc::new(GatedRunner(gate.clone())));
        let running = enqueue(&h, 1).await;

        // wait until the single worker has picked up the first job
        for _ in 0..200 {
            if h.registry.get(running).unwrap().state == JobState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let queued = enqueue(&h, 2).await;

        let Harness {
            tx,
            logs,
            registry,
            group,
        } = h;
        let shutdown = tokio::spawn(group.shutdown_and_join());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shutdown.is_finished());

        gate.notify_one();
        shutdown.await.unwrap();

        assert_eq!(registry.get(running).unwrap().state, JobState::Succeeded);
        assert_eq!(registry.get(queued).unwrap().outcome, Some(BuildOutcome::Cancelled));
        assert_eq!(
            logs.read(queued).await.unwrap(),
            "ERROR: dispatcher is shutting down"
        );
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn job_sent_on_a_reserved_slot_during_shutdown_is_cancelled() {
        let h = harness(1, 8, Arc::new(ScriptedRunner));
        let Harness {
            tx,
            logs,
            registry,
            group,
        } = h;

        // submit が枠を確保し、アップロードを読んでいる最中に shutdown が来る
        let permit = tx.reserve().await.unwrap();
        let shutdown = tokio::spawn(group.shutdown_and_join());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shutdown.is_finished());

        let late = RequestId::new(7);
        registry.insert_queued(late, Principal::new("test"), Utc::now());
        let mut bytes: &[u8] = b"late";
        let cache = StreamCache::capture(&mut bytes, None).await.unwrap();
        permit.send(BuildJob { request: late, cache });
        shutdown.await.unwrap();

        assert_eq!(registry.get(late).unwrap().outcome, Some(BuildOutcome::Cancelled));
        assert_eq!(logs.read(late).await.unwrap(), "ERROR: dispatcher is shutting down");
    }

    #[tokio::test]
    async fn released_reservation_does_not_hold_up_shutdown() {
        let h = harness(1, 8, Arc::new(ScriptedRunner));
        let permit = h.tx.reserve().await.unwrap();
        drop(permit);
        tokio::time::timeout(Duration::from_secs(5), h.group.shutdown_and_join())
            .await
            .unwrap();
    }
}
