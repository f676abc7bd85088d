//! JobDispatcher - ビルド要求の受付
//!
//! # 同期部分（呼び出し元が待つ）
//! 1. キューの空きを予約（満杯なら `Saturated`、id は発行しない）
//! 2. 受信ストリームを StreamCache へ退避（失敗なら `Stream`、id は発行しない）
//! 3. 新しい RequestId を引く（既知の id なら引き直す）
//! 4. "Compiling Job started" を記録し、Queued で登録
//! 5. 予約した枠にジョブを入れて id を返す
//!
//! 展開とビルドは WorkerGroup が行い、結果は LogStore と状態にだけ現れます。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::domain::{Principal, RequestId};
use crate::error::KilnError;
use crate::pipeline::StreamCache;
use crate::ports::{Clock, IdGenerator, LogStore};

use super::status::StatusRegistry;

pub const JOB_STARTED: &str = "Compiling Job started";

/// A submission waiting for a worker. Owns the cached upload.
#[derive(Debug)]
pub struct BuildJob {
    pub request: RequestId,
    pub cache: StreamCache,
}

pub struct JobDispatcher {
    jobs: mpsc::Sender<BuildJob>,
    capacity: usize,
    logs: Arc<dyn LogStore>,
    ids: Arc<dyn IdGenerator>,
    registry: Arc<StatusRegistry>,
    clock: Arc<dyn Clock>,
    work_dir: Option<PathBuf>,
}

impl JobDispatcher {
    /// Create the dispatcher and the receiving end of its bounded job queue.
    pub fn new(
        capacity: usize,
        logs: Arc<dyn LogStore>,
        ids: Arc<dyn IdGenerator>,
        registry: Arc<StatusRegistry>,
        clock: Arc<dyn Clock>,
        work_dir: Option<PathBuf>,
    ) -> (Self, mpsc::Receiver<BuildJob>) {
        let (jobs, rx) = mpsc::channel(capacity);
        let dispatcher = Self {
            jobs,
            capacity,
            logs,
            ids,
            registry,
            clock,
            work_dir,
        };
        (dispatcher, rx)
    }

    pub async fn submit<R>(&self, principal: &Principal, stream: &mut R) -> Result<RequestId, KilnError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let permit = self.jobs.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => KilnError::Saturated {
                capacity: self.capacity,
            },
            TrySendError::Closed(()) => KilnError::ShuttingDown,
        })?;

        let cache = StreamCache::capture(stream, self.work_dir.as_deref())
            .await
            .map_err(KilnError::Stream)?;

        let request = self.claim_id(principal);
        if let Err(e) = self.logs.append(request, JOB_STARTED).await {
            self.registry.remove(request);
            warn!(request = %request, error = %e, "could not record job start");
            return Err(e.into());
        }

        info!(request = %request, principal = %principal, bytes = cache.len(), "build job queued");
        permit.send(BuildJob { request, cache });
        Ok(request)
    }

    /// Draw ids until one is not already known to the registry.
    fn claim_id(&self, principal: &Principal) -> RequestId {
        loop {
            let request = self.ids.generate();
            if self.registry.insert_queued(request, principal.clone(), self.clock.now()) {
                return request;
            }
            warn!(request = %request, "request id collision, drawing again");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobState;
    use crate::impls::InMemoryLogStore;
    use crate::ports::{OsRngIdGenerator, SystemClock};
    use parking_lot::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct SequenceIds(Mutex<Vec<u64>>);

    impl IdGenerator for SequenceIds {
        fn generate(&self) -> RequestId {
            RequestId::new(self.0.lock().remove(0))
        }
    }

    struct BrokenStream;

    impl AsyncRead for BrokenStream {
        fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away")))
        }
    }

    struct Fixture {
        dispatcher: JobDispatcher,
        rx: mpsc::Receiver<BuildJob>,
        logs: Arc<InMemoryLogStore>,
        registry: Arc<StatusRegistry>,
    }

    fn fixture(capacity: usize, ids: Arc<dyn IdGenerator>) -> Fixture {
        let logs = Arc::new(InMemoryLogStore::new());
        let registry = Arc::new(StatusRegistry::new());
        let (dispatcher, rx) = JobDispatcher::new(
            capacity,
            logs.clone(),
            ids,
            registry.clone(),
            Arc::new(SystemClock),
            None,
        );
        Fixture {
            dispatcher,
            rx,
            logs,
            registry,
        }
    }

    fn alice() -> Principal {
        Principal::new("alice")
    }

    #[tokio::test]
    async fn submit_logs_start_and_queues_job() {
        let mut f = fixture(4, Arc::new(OsRngIdGenerator));
        let mut upload: &[u8] = b"PK\x05\x06";

        let id = f.dispatcher.submit(&alice(), &mut upload).await.unwrap();

        assert_eq!(f.logs.read(id).await.unwrap(), JOB_STARTED);
        let status = f.registry.get(id).unwrap();
        assert_eq!(status.state, JobState::Queued);
        assert_eq!(status.owner, alice());

        let job = f.rx.recv().await.unwrap();
        assert_eq!(job.request, id);
        assert_eq!(job.cache.len(), 4);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_issuing_an_id() {
        let f = fixture(1, Arc::new(SequenceIds(Mutex::new(vec![1, 2]))));
        let mut first: &[u8] = b"a";
        let mut second: &[u8] = b"b";

        f.dispatcher.submit(&alice(), &mut first).await.unwrap();
        let err = f.dispatcher.submit(&alice(), &mut second).await.unwrap_err();

        assert!(matches!(err, KilnError::Saturated { capacity: 1 }));
        assert!(!f.registry.contains(RequestId::new(2)));
        assert_eq!(f.logs.read(RequestId::new(2)).await.unwrap(), "");
    }

    #[tokio::test]
    async fn broken_stream_issues_no_id() {
        let f = fixture(4, Arc::new(SequenceIds(Mutex::new(vec![1]))));

        let err = f.dispatcher.submit(&alice(), &mut BrokenStream).await.unwrap_err();

        assert!(matches!(err, KilnError::Stream(_)));
        assert_eq!(f.registry.counts().queued, 0);
        assert_eq!(f.logs.read(RequestId::new(1)).await.unwrap(), "");
    }

    #[tokio::test]
    async fn colliding_ids_are_redrawn() {
        let f = fixture(4, Arc::new(SequenceIds(Mutex::new(vec![5, 5, 6]))));
        let mut a: &[u8] = b"a";
        let mut b: &[u8] = b"b";

        let first = f.dispatcher.submit(&alice(), &mut a).await.unwrap();
        let second = f.dispatcher.submit(&alice(), &mut b).await.unwrap();

        assert_eq!(first, RequestId::new(5));
        assert_eq!(second, RequestId::new(6));
    }

    #[tokio::test]
    async fn closed_queue_reports_shutdown() {
        let f = fixture(4, Arc::new(OsRngIdGenerator));
        drop(f.rx);
        let mut upload: &[u8] = b"a";

        let err = f.dispatcher.submit(&alice(), &mut upload).await.unwrap_err();
        assert!(matches!(err, KilnError::ShuttingDown));
    }
}
