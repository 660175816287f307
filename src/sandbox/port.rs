//! Execution environment capability port
//!
//! The core never talks to a concrete micro-VM or container provider
//! directly. Everything it needs from the execution substrate is expressed
//! through the [`ExecutionEnvironment`] trait, and a provider adapter
//! implements it out-of-tree.

use std::time::Duration;

use async_trait::async_trait;

/// Output of a command executed inside an environment
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// True if the command exited cleanly
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One entry from a directory listing
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Error type for environment port operations
#[derive(Debug)]
pub enum PortError {
    /// The referenced environment does not exist or is already dead
    NotFound(String),
    /// The operation exceeded its deadline
    Timeout(String),
    /// Any other provider-side failure
    Failed(String),
}

impl std::fmt::Display for PortError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortError::NotFound(msg) => write!(f, "environment not found: {}", msg),
            PortError::Timeout(msg) => write!(f, "operation timed out: {}", msg),
            PortError::Failed(msg) => write!(f, "environment operation failed: {}", msg),
        }
    }
}

impl std::error::Error for PortError {}

/// Abstract operations the core requires from the execution substrate.
///
/// `Handle` is whatever the provider uses to address one live environment
/// (a connection, a client, an id wrapper). The core only clones and
/// passes it back; it never inspects it.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    /// Create a fresh environment with a bounded lifetime.
    ///
    /// Returns the provider's opaque identifier together with a handle.
    /// The identifier is what survives a lost handle: it can be fed back
    /// into [`connect`](Self::connect) later.
    async fn create(&self, lifetime_budget: Duration)
        -> Result<(String, Self::Handle), PortError>;

    /// Reconnect to a previously created environment by identifier.
    /// Fails if the environment is gone.
    async fn connect(&self, environment_id: &str) -> Result<Self::Handle, PortError>;

    /// Lightweight liveness check. A transport failure counts as "not alive"
    /// at the call site; this only errors on misuse.
    async fn probe(&self, handle: &Self::Handle) -> Result<bool, PortError>;

    /// Run a command in the environment's working root and wait for it.
    async fn run(
        &self,
        handle: &Self::Handle,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, PortError>;

    /// Start a long-running process (e.g. a dev server) and return without
    /// waiting. The process intentionally outlives the triggering request.
    async fn run_detached(&self, handle: &Self::Handle, command: &str) -> Result<(), PortError>;

    async fn write_file(
        &self,
        handle: &Self::Handle,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), PortError>;

    async fn read_file(&self, handle: &Self::Handle, path: &str) -> Result<Vec<u8>, PortError>;

    async fn list_dir(
        &self,
        handle: &Self::Handle,
        path: &str,
    ) -> Result<Vec<DirEntry>, PortError>;

    /// Externally reachable URL for a port exposed by the environment.
    async fn exposed_address(&self, handle: &Self::Handle, port: u16)
        -> Result<String, PortError>;

    async fn destroy(&self, handle: &Self::Handle) -> Result<(), PortError>;
}
