//! Public entry points
//!
//! [`Orchestrator`] wires the driver, lifecycle manager, tool executor, and
//! broadcaster together over caller-supplied capability ports, and exposes
//! the surface a presentation layer talks to: chat, status, keep-alive,
//! release, preview, and event subscription.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::agent::{AgentConfig, AgentDriver, AgentError, ChatOutcome};
use crate::broadcast::{ActivityBroadcaster, ActivityEvent};
use crate::llm::{ChatMessage, Completion};
use crate::sandbox::{
    DirEntry, ExecutionEnvironment, KeepAlive, SandboxConfig, SandboxError, SandboxManager,
    SessionStatus,
};
use crate::tools::{ToolExecutor, ToolExecutorConfig};

/// Everything a caller needs, behind two capability ports
pub struct Orchestrator<E: ExecutionEnvironment, C: Completion> {
    driver: AgentDriver<E, C>,
    manager: Arc<SandboxManager<E>>,
    broadcaster: Arc<ActivityBroadcaster>,
}

impl<E: ExecutionEnvironment, C: Completion> Orchestrator<E, C> {
    pub fn new(
        env: Arc<E>,
        completion: Arc<C>,
        sandbox_config: SandboxConfig,
        tool_config: ToolExecutorConfig,
        agent_config: AgentConfig,
    ) -> Self {
        let broadcaster = Arc::new(ActivityBroadcaster::default());
        let manager = Arc::new(SandboxManager::new(
            Arc::clone(&env),
            Arc::clone(&broadcaster),
            sandbox_config,
        ));
        let executor = ToolExecutor::new(
            Arc::clone(&manager),
            env,
            Arc::clone(&broadcaster),
            tool_config,
        );
        let driver = AgentDriver::new(
            completion,
            Arc::clone(&manager),
            executor,
            Arc::clone(&broadcaster),
            agent_config,
        );
        Self {
            driver,
            manager,
            broadcaster,
        }
    }

    /// Construct with default lifecycle, tool, and loop configuration
    pub fn with_defaults(env: Arc<E>, completion: Arc<C>) -> Self {
        Self::new(
            env,
            completion,
            SandboxConfig::default(),
            ToolExecutorConfig::default(),
            AgentConfig::default(),
        )
    }

    /// Run the agentic loop for one user message and return the final text.
    pub async fn chat(
        &self,
        session_key: &str,
        message: &str,
        history: Vec<ChatMessage>,
    ) -> Result<ChatOutcome, AgentError> {
        self.driver.chat(session_key, message, history).await
    }

    /// Explicitly provision (or re-acquire) the session's environment.
    /// Retry policy on ProvisionFailed belongs to the caller.
    pub async fn provision(&self, session_key: &str) -> Result<String, SandboxError> {
        self.manager
            .provision(session_key)
            .await
            .map(|env_ref| env_ref.environment_id)
    }

    pub async fn status(&self, session_key: &str) -> SessionStatus {
        self.manager.status(session_key).await
    }

    pub async fn keep_alive(&self, session_key: &str) -> KeepAlive {
        self.manager.keep_alive(session_key).await
    }

    pub async fn release(&self, session_key: &str) {
        self.manager.release(session_key).await;
    }

    /// Start a detached preview server and return its external URL
    pub async fn start_preview(
        &self,
        session_key: &str,
        command: &str,
        port: u16,
    ) -> Result<String, SandboxError> {
        self.manager.start_preview(session_key, command, port).await
    }

    /// Read a file out of the session's environment (file-browser support)
    pub async fn read_file(&self, session_key: &str, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.manager.read_file(session_key, path).await
    }

    /// List a directory in the session's environment
    pub async fn list_dir(
        &self,
        session_key: &str,
        path: &str,
    ) -> Result<Vec<DirEntry>, SandboxError> {
        self.manager.list_dir(session_key, path).await
    }

    /// Seed a session with an externally persisted environment identifier
    pub async fn adopt_environment(&self, session_key: &str, environment_id: impl Into<String>) {
        self.manager
            .adopt_environment(session_key, environment_id)
            .await;
    }

    /// Subscribe to the session's activity stream
    pub fn subscribe(&self, session_key: &str) -> broadcast::Receiver<ActivityEvent> {
        self.broadcaster.subscribe(session_key)
    }
}
