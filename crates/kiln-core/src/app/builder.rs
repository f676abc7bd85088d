//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports の差し替え（テストでは LogStore / IdGenerator / Clock を注入）

use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, KilnConfig, StorageBackend};
use crate::impls::{FileLogStore, InMemoryLogStore};
use crate::pipeline::{ArchiveExtractor, BuildRunner};
use crate::ports::{
    Authenticator, Clock, IdGenerator, LogStore, OsRngIdGenerator, StaticAuthenticator, StoreError,
    SystemClock,
};

use super::dispatcher::JobDispatcher;
use super::service::BuildService;
use super::status::StatusRegistry;
use super::worker_pool::{JobRunner, PipelineRunner, WorkerGroup};

/// AppBuilder は設定から App を構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(KilnConfig::load(None)?).build().await?;
/// let service = app.service();
/// let principal = service.authenticate(&creds)?;
/// let id = service.submit_build(&principal, &mut upload).await?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定を検証し、ストアを開く
/// - どちらかが失敗すれば BuildError を返し、ワーカーは起動しない
pub struct AppBuilder {
    config: KilnConfig,
    logs: Option<Arc<dyn LogStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
    runner: Option<Arc<dyn JobRunner>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not open log store: {0}")]
    Store(#[from] StoreError),
}

impl AppBuilder {
    pub fn new(config: KilnConfig) -> Self {
        Self {
            config,
            logs: None,
            ids: None,
            clock: None,
            runner: None,
        }
    }

    /// Use this store instead of the configured backend.
    pub fn with_log_store(mut self, logs: Arc<dyn LogStore>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the extract+build pipeline run for each job.
    pub fn with_job_runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Validate, open the store and start the workers. Needs a tokio runtime.
    pub async fn build(self) -> Result<App, BuildError> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let logs = match self.logs {
            Some(logs) => logs,
            None => open_store(&config, Arc::clone(&clock)).await?,
        };
        let ids = self.ids.unwrap_or_else(|| Arc::new(OsRngIdGenerator));
        let authenticator = config.auth.as_ref().map(|auth| {
            Arc::new(StaticAuthenticator::new(auth.username.clone(), auth.password.clone())) as Arc<dyn Authenticator>
        });

        let registry = Arc::new(StatusRegistry::with_retention(config.status.retention()));
        let (dispatcher, jobs) = JobDispatcher::new(
            config.pool.queue_capacity,
            Arc::clone(&logs),
            ids,
            Arc::clone(&registry),
            Arc::clone(&clock),
            config.work_dir.clone(),
        );

        let runner = self.runner.unwrap_or_else(|| {
            Arc::new(PipelineRunner::new(
                ArchiveExtractor::new(Arc::clone(&logs), config.work_dir.clone()),
                BuildRunner::new(Arc::clone(&logs), config.build.clone()),
            ))
        });
        let workers = WorkerGroup::spawn(
            config.pool.workers,
            jobs,
            runner,
            Arc::clone(&logs),
            Arc::clone(&registry),
            clock,
        );

        let service = BuildService::new(dispatcher, logs, registry, authenticator, config.enforce_ownership);
        info!(
            workers = config.pool.workers,
            queue_capacity = config.pool.queue_capacity,
            program = %config.build.program,
            "kiln started"
        );

        Ok(App {
            service: Arc::new(service),
            workers,
        })
    }
}

async fn open_store(config: &KilnConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn LogStore>, BuildError> {
    match (&config.storage.backend, &config.storage.dir) {
        (StorageBackend::Memory, _) => Ok(Arc::new(InMemoryLogStore::with_clock(clock))),
        (StorageBackend::File, Some(dir)) => Ok(Arc::new(FileLogStore::open_with_clock(dir, clock).await?)),
        (StorageBackend::File, None) => Err(ConfigError::Invalid("storage.dir is required for the file backend".into()).into()),
    }
}

/// App はアプリケーションのランタイム
///
/// - service: routing 層が呼ぶ API
/// - workers: バックグラウンドでジョブを実行
pub struct App {
    service: Arc<BuildService>,
    workers: WorkerGroup,
}

impl App {
    pub fn service(&self) -> Arc<BuildService> {
        Arc::clone(&self.service)
    }

    /// Stop taking jobs and wait for in-flight builds.
    pub async fn shutdown(self) {
        self.workers.shutdown_and_join().await;
    }
}
