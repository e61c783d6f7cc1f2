//! Supervised execution of one transfer process.
//!
//! The session never trusts the transport to finish on its own. After a
//! warm-up it polls the size of the target file; a file that stops growing for
//! more than `max_stall_rounds` polls gets the process terminated, first with a
//! graceful signal and then, if it is still alive after `max_kill_wait`
//! checks, by force.

use std::process::ExitStatus;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::traits::{TransferRequest, Transport};
use crate::config::SupervisorConfig;
use crate::utils::fs::file_size;
use crate::{Error, Result};

/// How a supervised transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The process exited by itself. Death by signal is reported as `-1`.
    Completed { code: i32 },
    /// The target stopped growing and the process was terminated.
    Stalled,
    /// [`TransportSession::kill`] was called.
    Cancelled,
}

impl SessionExit {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { code: 0 })
    }

    /// Exit code, when the process exited by itself.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Completed { code } => Some(*code),
            _ => None,
        }
    }
}

fn exit_from(status: std::io::Result<ExitStatus>) -> SessionExit {
    match status {
        Ok(status) => SessionExit::Completed {
            code: status.code().unwrap_or(-1),
        },
        Err(e) => {
            error!("Error waiting for transfer process: {}", e);
            SessionExit::Completed { code: -1 }
        }
    }
}

/// Runs transfers under stall supervision and can be cancelled from any task.
#[derive(Debug, Clone)]
pub struct TransportSession {
    config: SupervisorConfig,
    cancellation_token: CancellationToken,
}

impl TransportSession {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// A session that is cancelled together with `token`.
    pub fn with_cancellation(config: SupervisorConfig, token: CancellationToken) -> Self {
        Self {
            config,
            cancellation_token: token,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Stop the running transfer, if any. Safe to call repeatedly and after completion.
    pub fn kill(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Run `request` through `transport` until the process exits, stalls or is cancelled.
    ///
    /// Only failures to build or spawn the process are returned as errors.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: &TransferRequest,
    ) -> Result<SessionExit> {
        if self.is_cancelled() {
            return Ok(SessionExit::Cancelled);
        }

        let config = self
            .config
            .for_transfer(&request.url, &request.target_path);
        let mut cmd = transport.command(request)?;
        cmd.kill_on_drop(true);
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .spawn()
            .map_err(|source| Error::Spawn { program, source })?;

        debug!(
            transport = transport.name(),
            url = %request.url,
            target = %request.target_path.display(),
            start = request.start,
            end = ?request.end,
            "Transfer process started"
        );

        if let Some(stderr) = child.stderr.take() {
            let name = transport.name().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(transport = %name, "{}", line);
                }
            });
        }

        tokio::select! {
            status = child.wait() => return Ok(exit_from(status)),
            _ = self.cancellation_token.cancelled() => {
                return Ok(self.cancel(&mut child).await);
            }
            _ = tokio::time::sleep(config.warmup()) => {}
        }

        let mut last_size = 0u64;
        let mut stall_rounds = 0u32;
        loop {
            let size = file_size(&request.target_path).await.unwrap_or(0);
            if size == last_size {
                stall_rounds += 1;
                if stall_rounds > config.max_stall_rounds {
                    warn!(
                        target = %request.target_path.display(),
                        size,
                        rounds = stall_rounds,
                        "Transfer stalled, terminating"
                    );
                    terminate(&mut child, &config).await;
                    return Ok(SessionExit::Stalled);
                }
            } else {
                stall_rounds = 0;
                last_size = size;
            }

            tokio::select! {
                status = child.wait() => return Ok(exit_from(status)),
                _ = self.cancellation_token.cancelled() => {
                    return Ok(self.cancel(&mut child).await);
                }
                _ = tokio::time::sleep(config.poll_interval()) => {}
            }
        }
    }

    async fn cancel(&self, child: &mut Child) -> SessionExit {
        debug!("Transfer cancelled, killing process");
        if let Err(e) = process_utils::force_kill(child).await {
            warn!("Failed to kill cancelled transfer: {}", e);
        }
        SessionExit::Cancelled
    }
}

/// Ask the process to exit, then force it after `max_kill_wait` unanswered checks.
async fn terminate(child: &mut Child, config: &SupervisorConfig) {
    if let Err(e) = process_utils::request_termination(child) {
        warn!("Failed to signal transfer process: {}", e);
    }

    for _ in 0..config.max_kill_wait {
        if !process_utils::is_running(child) {
            return;
        }
        tokio::time::sleep(config.kill_poll_interval()).await;
    }
    if !process_utils::is_running(child) {
        return;
    }

    warn!("Transfer process ignored termination, killing");
    if let Err(e) = process_utils::force_kill(child).await {
        error!("Failed to kill transfer process: {}", e);
    }
}
