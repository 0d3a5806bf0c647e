//! The worker process contract.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::ProcessError;

/// Observable status of a project's agent worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgentStatus {
    /// No worker process.
    #[default]
    Idle,
    /// Worker is running.
    Running,
    /// Worker exists but is paused; treated as running for scheduling.
    Paused,
    /// Worker exited unexpectedly.
    Crashed,
}

impl AgentStatus {
    /// Whether a worker process currently exists (running or paused).
    pub fn is_live(self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::Paused)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Paused => write!(f, "paused"),
            AgentStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// Options passed through from the schedule to the worker on start.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub yolo_mode: bool,
    pub model: Option<String>,
    pub max_concurrency: u32,
}

/// Start/stop/status contract for one project's worker.
///
/// The scheduler treats `start`/`stop` as fire-and-observe: an `Err` is
/// logged with its message and never escalated.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Launch the worker. Fails if one is already live.
    async fn start(&self, options: StartOptions) -> Result<(), ProcessError>;

    /// Stop the worker. Fails if none is live.
    async fn stop(&self) -> Result<(), ProcessError>;

    /// Current status.
    async fn status(&self) -> AgentStatus;

    /// Subscribe to status changes. Dropping the receiver releases the
    /// subscription.
    fn watch_status(&self) -> watch::Receiver<AgentStatus>;
}

/// Resolves the controller for a project by name.
pub trait ControllerRegistry: Send + Sync {
    /// `None` for unknown projects; callers treat that as a benign skip.
    fn controller(&self, project: &str) -> Option<Arc<dyn ProcessController>>;
}

/// Fixed registry populated at startup, one controller per project.
#[derive(Default)]
pub struct StaticRegistry {
    controllers: DashMap<String, Arc<dyn ProcessController>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: impl Into<String>, controller: Arc<dyn ProcessController>) {
        self.controllers.insert(project.into(), controller);
    }
}

impl ControllerRegistry for StaticRegistry {
    fn controller(&self, project: &str) -> Option<Arc<dyn ProcessController>> {
        self.controllers.get(project).map(|c| Arc::clone(c.value()))
    }
}
