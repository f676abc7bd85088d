//! BuildRunner - ビルドツールの起動と出力の取り込み
//!
//! # フロー
//! 1. 展開ディレクトリから build descriptor を探す（blocking pool）
//! 2. 見つからなければ info 行を記録して終了（エラーではない）
//! 3. 外部ビルドツールを起動し、stdout / stderr を 1 行ずつ LogStore へ流す
//! 4. 期限切れならツールを kill して「timed out」行を記録
//!
//! 終了コードはツール自身の出力以上には扱わず、`BuildOutcome` にだけ残します。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BuildToolConfig;
use crate::domain::{BuildOutcome, RequestId};
use crate::ports::LogStore;

use super::descriptor::find_descriptor;

/// How long to keep reading pipes after the tool is gone. Grandchildren that
/// inherited the pipes can otherwise hold them open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("corrupted project directory: {0}")]
    Discovery(String),

    #[error("could not launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct BuildRunner {
    logs: Arc<dyn LogStore>,
    tool: BuildToolConfig,
}

impl BuildRunner {
    pub fn new(logs: Arc<dyn LogStore>, tool: BuildToolConfig) -> Self {
        Self { logs, tool }
    }

    pub fn tool(&self) -> &BuildToolConfig {
        &self.tool
    }

    /// Discover the descriptor under `project` and build it.
    pub async fn run(&self, project: &Path, request: RequestId) -> BuildOutcome {
        let descriptor = match self.discover(project).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                let msg = format!("Build descriptor not found: {}", self.tool.descriptor);
                info!(request = %request, "{msg}");
                self.record(request, &msg).await;
                return BuildOutcome::DescriptorMissing;
            }
            Err(err) => {
                warn!(request = %request, error = %err, "descriptor discovery failed");
                self.record_error(request, &err).await;
                return BuildOutcome::LaunchFailed;
            }
        };

        match self.invoke(&descriptor, request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(request = %request, error = %err, "build invocation failed");
                self.record_error(request, &err).await;
                BuildOutcome::LaunchFailed
            }
        }
    }

    async fn discover(&self, project: &Path) -> Result<Option<PathBuf>, RunnerError> {
        let root = project.to_path_buf();
        let name = self.tool.descriptor.clone();
        tokio::task::spawn_blocking(move || find_descriptor(&root, &name))
            .await
            .map_err(|e| RunnerError::Discovery(e.to_string()))?
            .map_err(|e| RunnerError::Discovery(e.to_string()))
    }

    async fn invoke(&self, descriptor: &Path, request: RequestId) -> Result<BuildOutcome, RunnerError> {
        let program = self.tool.program.clone();
        let mut cmd = Command::new(&program);
        cmd.args(self.tool.command_args(descriptor))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = descriptor.parent() {
            cmd.current_dir(dir);
        }

        info!(request = %request, program = %program, descriptor = %descriptor.display(), "invoking build tool");
        let mut child = cmd.spawn().map_err(|source| RunnerError::Launch {
            program: program.clone(),
            source,
        })?;

        let pumps: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|s| self.spawn_pump(s, request)),
            child.stderr.take().map(|s| self.spawn_pump(s, request)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let deadline = self.tool.timeout();
        let outcome = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => {
                info!(request = %request, exit_code = ?status.code(), "build tool finished");
                BuildOutcome::Completed {
                    exit_code: status.code(),
                }
            }
            Ok(Err(source)) => {
                drain(pumps).await;
                return Err(RunnerError::Wait { program, source });
            }
            Err(_) => {
                warn!(request = %request, timeout_secs = deadline.as_secs(), "build timed out, killing tool");
                if let Err(e) = child.kill().await {
                    warn!(request = %request, error = %e, "could not kill build tool");
                }
                BuildOutcome::TimedOut
            }
        };

        // 全出力を記録してから timed out 行を足す
        drain(pumps).await;
        if outcome == BuildOutcome::TimedOut {
            let msg = format!(
                "Build timed out after {}s, build tool killed",
                deadline.as_secs()
            );
            self.record(request, &msg).await;
        }
        Ok(outcome)
    }

    fn spawn_pump<R>(&self, stream: R, request: RequestId) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(pump_lines(stream, Arc::clone(&self.logs), request))
    }

    async fn record(&self, request: RequestId, line: &str) {
        if let Err(e) = self.logs.append(request, line).await {
            warn!(request = %request, error = %e, "could not append log line");
        }
    }

    async fn record_error(&self, request: RequestId, err: &RunnerError) {
        if let Err(e) = self.logs.append_error(request, err).await {
            warn!(request = %request, error = %e, "could not append error line");
        }
    }
}

/// Forward every line of `stream` to the log as soon as it is read.
async fn pump_lines<R>(stream: R, logs: Arc<dyn LogStore>, request: RequestId)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_eol(&buf));
                if let Err(e) = logs.append(request, &line).await {
                    warn!(request = %request, error = %e, "dropped build output line");
                }
            }
            Err(e) => {
                debug!(request = %request, error = %e, "build output pipe closed");
                break;
            }
        }
    }
}

async fn drain(pumps: Vec<JoinHandle<()>>) {
    for pump in pumps {
        let abort = pump.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, pump).await.is_err() {
            abort.abort();
        }
    }
}

fn trim_eol(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}
