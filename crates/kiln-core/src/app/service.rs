//! BuildService - routing 層から呼ばれる表面
//!
//! 認証は Authenticator に任せ、以降は Principal を受け取るだけです。
//! `enforce_ownership` が有効なときは、ジョブを作った principal 以外の
//! ログ操作を `Forbidden` で拒否します。レジストリが知らない id は誰でも扱えます。
//! ログを削除すると、終わったジョブの状態もレジストリから消えます。

use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::domain::{Credentials, JobStatus, LogEntry, Principal, RequestId};
use crate::error::KilnError;
use crate::observability::JobCounts;
use crate::ports::{Authenticator, LogStore};

use super::dispatcher::JobDispatcher;
use super::status::StatusRegistry;

pub struct BuildService {
    dispatcher: JobDispatcher,
    logs: Arc<dyn LogStore>,
    registry: Arc<StatusRegistry>,
    authenticator: Option<Arc<dyn Authenticator>>,
    enforce_ownership: bool,
}

impl BuildService {
    pub fn new(
        dispatcher: JobDispatcher,
        logs: Arc<dyn LogStore>,
        registry: Arc<StatusRegistry>,
        authenticator: Option<Arc<dyn Authenticator>>,
        enforce_ownership: bool,
    ) -> Self {
        Self {
            dispatcher,
            logs,
            registry,
            authenticator,
            enforce_ownership,
        }
    }

    /// Without an authenticator every caller is accepted under its own username.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<Principal, KilnError> {
        match &self.authenticator {
            Some(auth) => auth.authenticate(credentials).ok_or_else(|| {
                warn!(username = %credentials.username, "authentication rejected");
                KilnError::Unauthorized
            }),
            None => Ok(Principal::new(credentials.username.clone())),
        }
    }

    pub fn ping(&self) -> &'static str {
        "pong"
    }

    pub async fn submit_build<R>(&self, principal: &Principal, upload: &mut R) -> Result<RequestId, KilnError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.dispatcher.submit(principal, upload).await
    }

    pub async fn append_log(&self, principal: &Principal, request: RequestId, line: &str) -> Result<(), KilnError> {
        self.check_access(principal, request)?;
        self.logs.append(request, line).await?;
        Ok(())
    }

    pub async fn get_logs(&self, principal: &Principal, request: RequestId) -> Result<String, KilnError> {
        self.check_access(principal, request)?;
        Ok(self.logs.read(request).await?)
    }

    /// Entries in position order, for callers that need line boundaries.
    pub async fn log_entries(&self, principal: &Principal, request: RequestId) -> Result<Vec<LogEntry>, KilnError> {
        self.check_access(principal, request)?;
        Ok(self.logs.entries(request).await?)
    }

    pub async fn delete_logs(&self, principal: &Principal, request: RequestId) -> Result<usize, KilnError> {
        self.check_access(principal, request)?;
        let removed = self.logs.delete(request).await?;
        let forgotten = self.registry.forget_terminal(request);
        debug!(request = %request, removed, forgotten, "log deleted");
        Ok(removed)
    }

    pub fn job_status(&self, principal: &Principal, request: RequestId) -> Result<Option<JobStatus>, KilnError> {
        self.check_access(principal, request)?;
        Ok(self.registry.get(request))
    }

    pub fn counts(&self) -> JobCounts {
        self.registry.counts()
    }

    fn check_access(&self, principal: &Principal, request: RequestId) -> Result<(), KilnError> {
        if !self.enforce_ownership {
            return Ok(());
        }
        match self.registry.owner(request) {
            Some(owner) if &owner != principal => {
                warn!(request = %request, principal = %principal, "access to foreign request denied");
                Err(KilnError::Forbidden(request))
            }
            _ => Ok(()),
        }
    }
}
