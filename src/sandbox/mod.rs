//! Execution environment lifecycle
//!
//! - `port` - the abstract capability interface to the execution substrate
//! - `handle` - per-session live-environment bookkeeping
//! - `manager` - acquisition, provisioning, keep-alive, and expiry

pub mod handle;
pub mod manager;
pub mod port;

pub use handle::{LiveSandbox, SandboxState};
pub use manager::{
    EnvironmentRef, KeepAlive, SandboxConfig, SandboxError, SandboxManager, SessionStatus,
};
pub use port::{DirEntry, ExecOutput, ExecutionEnvironment, PortError};
