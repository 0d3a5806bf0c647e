//! Local subprocess controller.
//!
//! Spawns the configured agent command for one project and tracks its
//! lifetime: a wait task publishes `Crashed` on unexpected exit and `Idle`
//! on clean exit; `stop` kills the child and waits for it to be reaped.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::{AgentStatus, ProcessController, ProcessError, StartOptions};

/// How long `stop` waits for the child to be reaped after the kill.
const STOP_TIMEOUT_SECS: u64 = 10;

/// Controls one project's agent as a local child process.
pub struct LocalController {
    project: String,
    program: String,
    base_args: Vec<String>,
    workdir: PathBuf,
    status_tx: watch::Sender<AgentStatus>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl LocalController {
    pub fn new(
        project: impl Into<String>,
        program: impl Into<String>,
        base_args: Vec<String>,
        workdir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(AgentStatus::Idle);
        Arc::new(Self {
            project: project.into(),
            program: program.into(),
            base_args,
            workdir: workdir.into(),
            status_tx,
            kill_tx: Mutex::new(None),
        })
    }

    fn build_command(&self, options: &StartOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        cmd.current_dir(&self.workdir);
        if options.yolo_mode {
            cmd.arg("--yolo");
        }
        if let Some(model) = &options.model {
            cmd.arg("--model").arg(model);
        }
        if options.max_concurrency > 0 {
            cmd.arg("--max-concurrency")
                .arg(options.max_concurrency.to_string());
        }
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ProcessController for LocalController {
    async fn start(&self, options: StartOptions) -> Result<(), ProcessError> {
        let mut kill_slot = self.kill_tx.lock().await;
        if self.status_tx.borrow().is_live() {
            return Err(ProcessError::AlreadyRunning);
        }

        let mut child = self
            .build_command(&options)
            .spawn()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;

        info!(
            project = %self.project,
            pid = ?child.id(),
            yolo = options.yolo_mode,
            concurrency = options.max_concurrency,
            "agent process started"
        );

        let (kill, kill_rx) = oneshot::channel();
        *kill_slot = Some(kill);
        self.status_tx.send_replace(AgentStatus::Running);

        let status_tx = self.status_tx.clone();
        let project = self.project.clone();
        tokio::spawn(async move {
            tokio::select! {
                exit = child.wait() => {
                    let next = match exit {
                        Ok(status) if status.success() => {
                            info!(project = %project, "agent exited cleanly");
                            AgentStatus::Idle
                        }
                        Ok(status) => {
                            warn!(project = %project, code = ?status.code(), "agent crashed");
                            AgentStatus::Crashed
                        }
                        Err(e) => {
                            warn!(project = %project, error = %e, "failed to reap agent");
                            AgentStatus::Crashed
                        }
                    };
                    status_tx.send_replace(next);
                }
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        debug!(project = %project, error = %e, "kill after exit");
                    }
                    let _ = child.wait().await;
                    info!(project = %project, "agent stopped");
                    status_tx.send_replace(AgentStatus::Idle);
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ProcessError> {
        let mut kill_slot = self.kill_tx.lock().await;
        if !self.status_tx.borrow().is_live() {
            return Err(ProcessError::NotRunning);
        }
        if let Some(kill) = kill_slot.take() {
            let _ = kill.send(());
        }
        drop(kill_slot);

        // Wait for the reaper task to publish a terminal status.
        let mut rx = self.status_tx.subscribe();
        let reaped = async {
            while rx.borrow_and_update().is_live() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        timeout(Duration::from_secs(STOP_TIMEOUT_SECS), reaped)
            .await
            .map_err(|_| ProcessError::StopTimeout(STOP_TIMEOUT_SECS))?;
        Ok(())
    }

    async fn status(&self) -> AgentStatus {
        *self.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<AgentStatus> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Arc<LocalController> {
        LocalController::new(
            "test",
            "/bin/sh",
            vec!["-c".to_string(), script.to_string()],
            ".",
        )
    }

    async fn wait_for(
        rx: &mut watch::Receiver<AgentStatus>,
        expected: AgentStatus,
    ) -> AgentStatus {
        let deadline = Duration::from_secs(5);
        let _ = timeout(deadline, async {
            while *rx.borrow_and_update() != expected {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        *rx.borrow()
    }

    #[tokio::test]
    async fn start_then_stop_reaches_idle() {
        let ctl = shell("sleep 30");
        ctl.start(StartOptions::default()).await.unwrap();
        assert_eq!(ctl.status().await, AgentStatus::Running);

        ctl.stop().await.unwrap();
        assert_eq!(ctl.status().await, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_crash() {
        let ctl = shell("exit 7");
        let mut rx = ctl.watch_status();
        ctl.start(StartOptions::default()).await.unwrap();
        assert_eq!(wait_for(&mut rx, AgentStatus::Crashed).await, AgentStatus::Crashed);
    }

    #[tokio::test]
    async fn clean_exit_is_idle() {
        let ctl = shell("true");
        let mut rx = ctl.watch_status();
        ctl.start(StartOptions::default()).await.unwrap();
        assert_eq!(wait_for(&mut rx, AgentStatus::Idle).await, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let ctl = shell("sleep 30");
        ctl.start(StartOptions::default()).await.unwrap();
        assert!(matches!(
            ctl.start(StartOptions::default()).await,
            Err(ProcessError::AlreadyRunning)
        ));
        ctl.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let ctl = shell("sleep 30");
        assert!(matches!(ctl.stop().await, Err(ProcessError::NotRunning)));
    }

    #[tokio::test]
    async fn restart_after_crash_works() {
        let ctl = shell("exit 1");
        let mut rx = ctl.watch_status();
        ctl.start(StartOptions::default()).await.unwrap();
        wait_for(&mut rx, AgentStatus::Crashed).await;

        // a crashed controller accepts a fresh start
        ctl.start(StartOptions::default()).await.unwrap();
    }
}
