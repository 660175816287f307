//! Sandbox lifecycle manager
//!
//! Owns the mapping from session key to at-most-one live execution
//! environment. Acquisition never creates; provisioning is explicit and
//! idempotent. Every live handle is guarded by its own keep-alive task,
//! generation-tagged so a stale timer can never act on a newer handle.
//!
//! # Concurrency
//!
//! The handle table is sharded per key: the outer map lock is held only
//! long enough to look up or insert a slot, and all lifecycle work
//! serializes on the slot's own async mutex. Operations on unrelated
//! sessions never contend; racing `provision` calls for the same key
//! queue on the slot, so exactly one external create is issued and the
//! losers adopt the winner's handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::handle::{LiveSandbox, SandboxState};
use super::port::{DirEntry, ExecutionEnvironment, PortError};
use crate::broadcast::{ActivityBroadcaster, ActivityEvent, ActivityKind};
use crate::metrics;

/// Configuration for the lifecycle manager
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Lifetime budget requested for each created environment
    pub lifetime_budget: Duration,
    /// Deadline for a single liveness probe; must be well under the
    /// probe interval
    pub probe_timeout: Duration,
}

impl SandboxConfig {
    /// Keep-alive probe interval: 1/12 of the budget, so one missed probe
    /// cannot cause premature expiry but two consecutive misses reliably do.
    pub fn probe_interval(&self) -> Duration {
        self.lifetime_budget / 12
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            lifetime_budget: Duration::from_secs(60 * 60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Error type for lifecycle operations
#[derive(Debug)]
pub enum SandboxError {
    /// Nothing to acquire; recoverable by calling provision
    NoEnvironment,
    /// A previously active environment was discovered dead; recoverable by
    /// re-provisioning. Always paired with an EnvironmentExpired event.
    Expired(String),
    /// External creation call failed; surfaced verbatim, not retried here
    ProvisionFailed(String),
    /// Any other environment port failure
    Port(PortError),
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::NoEnvironment => {
                write!(f, "no environment to acquire; provision one first")
            }
            SandboxError::Expired(id) => write!(f, "environment {} expired", id),
            SandboxError::ProvisionFailed(msg) => {
                write!(f, "environment creation failed: {}", msg)
            }
            SandboxError::Port(e) => write!(f, "environment port error: {}", e),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<PortError> for SandboxError {
    fn from(e: PortError) -> Self {
        SandboxError::Port(e)
    }
}

/// A usable environment reference handed to callers
#[derive(Debug, Clone)]
pub struct EnvironmentRef<H> {
    pub environment_id: String,
    pub handle: H,
}

/// Result of a keep-alive probe
#[derive(Debug, Clone, Serialize)]
pub struct KeepAlive {
    pub alive: bool,
    /// Time left before the lifetime budget elapses; zero when dead
    pub remaining_budget: Duration,
}

/// Point-in-time view of one session's environment binding
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub active: bool,
    pub environment_id: Option<String>,
    pub preview_address: Option<String>,
}

struct SlotInner<H> {
    live: Option<LiveSandbox<H>>,
    /// External identifier that survives a lost in-process handle
    recorded_environment_id: Option<String>,
    next_generation: u64,
}

/// Per-session-key shard; all lifecycle work for one key serializes here
struct SessionSlot<H> {
    inner: Mutex<SlotInner<H>>,
}

impl<H> SessionSlot<H> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                live: None,
                recorded_environment_id: None,
                next_generation: 0,
            }),
        }
    }
}

/// Manages creation, health-checked reconnection, keep-alive, and expiry of
/// execution environments, one per session key.
pub struct SandboxManager<E: ExecutionEnvironment> {
    env: Arc<E>,
    broadcaster: Arc<ActivityBroadcaster>,
    config: SandboxConfig,
    slots: StdMutex<HashMap<String, Arc<SessionSlot<E::Handle>>>>,
}

impl<E: ExecutionEnvironment> SandboxManager<E> {
    pub fn new(env: Arc<E>, broadcaster: Arc<ActivityBroadcaster>, config: SandboxConfig) -> Self {
        Self {
            env,
            broadcaster,
            config,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Return a usable handle for the session, or fail.
    ///
    /// Never creates: probes the in-process handle if one exists, else
    /// attempts reconnection through a recorded external identifier. Any
    /// detected death discards the handle, cancels its keep-alive, and
    /// emits EnvironmentExpired exactly once.
    pub async fn acquire(
        &self,
        session_key: &str,
    ) -> Result<EnvironmentRef<E::Handle>, SandboxError> {
        let slot = self.slot(session_key);
        let mut inner = slot.inner.lock().await;
        self.try_acquire_locked(session_key, &slot, &mut inner).await
    }

    /// Return the existing handle if one is alive, otherwise create a new
    /// environment, record its identifier, and start its keep-alive task.
    pub async fn provision(
        &self,
        session_key: &str,
    ) -> Result<EnvironmentRef<E::Handle>, SandboxError> {
        let slot = self.slot(session_key);
        // Racing callers for the same key queue here; the loser re-runs the
        // acquire path below and adopts the winner's handle.
        let mut inner = slot.inner.lock().await;

        match self.try_acquire_locked(session_key, &slot, &mut inner).await {
            Ok(existing) => {
                metrics::PROVISIONS.with_label_values(&["reused"]).inc();
                return Ok(existing);
            }
            Err(SandboxError::NoEnvironment) | Err(SandboxError::Expired(_)) => {}
            Err(other) => return Err(other),
        }

        info!(session_key, "provisioning new environment");
        let (environment_id, handle) = match self.env.create(self.config.lifetime_budget).await {
            Ok(created) => created,
            Err(e) => {
                metrics::PROVISIONS.with_label_values(&["failed"]).inc();
                warn!(session_key, error = %e, "environment creation failed");
                return Err(SandboxError::ProvisionFailed(e.to_string()));
            }
        };
        metrics::PROVISIONS.with_label_values(&["created"]).inc();
        info!(session_key, environment_id = %environment_id, "environment ready");

        self.install_locked(
            session_key,
            &slot,
            &mut inner,
            environment_id.clone(),
            handle.clone(),
        );
        Ok(EnvironmentRef {
            environment_id,
            handle,
        })
    }

    /// Probe liveness and refresh the activity clock.
    pub async fn keep_alive(&self, session_key: &str) -> KeepAlive {
        let slot = self.slot(session_key);
        let mut inner = slot.inner.lock().await;

        let snapshot = inner.live.as_ref().map(|live| {
            (
                live.handle.clone(),
                live.remaining_budget(self.config.lifetime_budget),
            )
        });
        match snapshot {
            Some((handle, remaining)) => {
                if remaining > Duration::ZERO && self.probe_ok(&handle).await {
                    if let Some(live) = inner.live.as_mut() {
                        live.refresh();
                    }
                    KeepAlive {
                        alive: true,
                        remaining_budget: remaining,
                    }
                } else {
                    self.expire_locked(session_key, &mut inner);
                    KeepAlive {
                        alive: false,
                        remaining_budget: Duration::ZERO,
                    }
                }
            }
            None => KeepAlive {
                alive: false,
                remaining_budget: Duration::ZERO,
            },
        }
    }

    /// Explicit destroy. Cancels the keep-alive, requests destruction, and
    /// removes the handle even when the remote destroy call fails.
    pub async fn release(&self, session_key: &str) {
        let slot = self.slot(session_key);
        let mut inner = slot.inner.lock().await;
        inner.recorded_environment_id = None;

        let Some(mut live) = inner.live.take() else {
            return;
        };
        live.cancel_keepalive();
        live.state = SandboxState::Terminated;

        if let Err(e) = self.env.destroy(&live.handle).await {
            warn!(
                session_key,
                environment_id = %live.environment_id,
                error = %e,
                "destroy failed; removing handle anyway"
            );
        }
        info!(session_key, environment_id = %live.environment_id, "environment released");
        self.broadcaster.publish(ActivityEvent::now(
            session_key,
            ActivityKind::Terminal {
                output: format!("environment {} released", live.environment_id),
            },
        ));
    }

    /// Start a detached process (typically a dev server) and expose its
    /// port, returning the externally reachable URL. The process outlives
    /// this call by design.
    pub async fn start_preview(
        &self,
        session_key: &str,
        command: &str,
        port: u16,
    ) -> Result<String, SandboxError> {
        let slot = self.slot(session_key);
        let mut inner = slot.inner.lock().await;
        let env_ref = self.try_acquire_locked(session_key, &slot, &mut inner).await?;

        self.env.run_detached(&env_ref.handle, command).await?;
        let url = self.env.exposed_address(&env_ref.handle, port).await?;
        if let Some(live) = inner.live.as_mut() {
            live.preview_address = Some(url.clone());
        }
        info!(session_key, url = %url, "preview ready");
        self.broadcaster.publish(ActivityEvent::now(
            session_key,
            ActivityKind::PreviewReady { url: url.clone() },
        ));
        Ok(url)
    }

    /// Read a file out of the session's environment, for file-browser
    /// style consumers.
    pub async fn read_file(
        &self,
        session_key: &str,
        path: &str,
    ) -> Result<Vec<u8>, SandboxError> {
        let slot = self.slot(session_key);
        let mut inner = slot.inner.lock().await;
        let env_ref = self.try_acquire_locked(session_key, &slot, &mut inner).await?;
        Ok(self.env.read_file(&env_ref.handle, path).await?)
    }

    /// List a directory in the session's environment.
    pub async fn list_dir(
        &self,
        session_key: &str,
        path: &str,
    ) -> Result<Vec<DirEntry>, SandboxError> {
        let slot = self.slot(session_key);
        let mut inner = slot.inner.lock().await;
        let env_ref = self.try_acquire_locked(session_key, &slot, &mut inner).await?;
        Ok(self.env.list_dir(&env_ref.handle, path).await?)
    }

    /// Record an externally persisted environment identifier so a later
    /// acquire can attempt reconnection. No-op while a live handle exists.
    pub async fn adopt_environment(&self, session_key: &str, environment_id: impl Into<String>) {
        let slot = self.slot(session_key);
        let mut inner = slot.inner.lock().await;
        if inner.live.is_none() {
            inner.recorded_environment_id = Some(environment_id.into());
        }
    }

    /// Point-in-time status for a session; never allocates a slot for an
    /// unknown key.
    pub async fn status(&self, session_key: &str) -> SessionStatus {
        let slot = {
            let slots = self.slots.lock().expect("slot table lock poisoned");
            slots.get(session_key).cloned()
        };
        let Some(slot) = slot else {
            return SessionStatus {
                active: false,
                environment_id: None,
                preview_address: None,
            };
        };
        let inner = slot.inner.lock().await;
        match inner.live.as_ref() {
            Some(live) => SessionStatus {
                active: true,
                environment_id: Some(live.environment_id.clone()),
                preview_address: live.preview_address.clone(),
            },
            None => SessionStatus {
                active: false,
                environment_id: inner.recorded_environment_id.clone(),
                preview_address: None,
            },
        }
    }

    fn slot(&self, session_key: &str) -> Arc<SessionSlot<E::Handle>> {
        let mut slots = self.slots.lock().expect("slot table lock poisoned");
        slots
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(SessionSlot::new()))
            .clone()
    }

    /// Probe with a bounded deadline; any port error counts as "not alive".
    async fn probe_ok(&self, handle: &E::Handle) -> bool {
        matches!(
            timeout(self.config.probe_timeout, self.env.probe(handle)).await,
            Ok(Ok(true))
        )
    }

    /// The acquire algorithm, run under the slot lock so it composes with
    /// provision without releasing the key's serialization.
    async fn try_acquire_locked(
        &self,
        session_key: &str,
        slot: &Arc<SessionSlot<E::Handle>>,
        inner: &mut SlotInner<E::Handle>,
    ) -> Result<EnvironmentRef<E::Handle>, SandboxError> {
        // (a) in-process handle, if alive
        let snapshot = inner
            .live
            .as_ref()
            .map(|live| (live.environment_id.clone(), live.handle.clone()));
        if let Some((environment_id, handle)) = snapshot {
            if self.probe_ok(&handle).await {
                if let Some(live) = inner.live.as_mut() {
                    live.refresh();
                }
                return Ok(EnvironmentRef {
                    environment_id,
                    handle,
                });
            }
            self.expire_locked(session_key, inner);
            return Err(SandboxError::Expired(environment_id));
        }

        // (b) recorded external identifier: reconnect, re-probe, adopt
        if let Some(environment_id) = inner.recorded_environment_id.clone() {
            match self.env.connect(&environment_id).await {
                Ok(handle) => {
                    if self.probe_ok(&handle).await {
                        info!(
                            session_key,
                            environment_id = %environment_id,
                            "re-adopted recorded environment"
                        );
                        self.install_locked(
                            session_key,
                            slot,
                            inner,
                            environment_id.clone(),
                            handle.clone(),
                        );
                        return Ok(EnvironmentRef {
                            environment_id,
                            handle,
                        });
                    }
                }
                Err(e) => {
                    debug!(session_key, error = %e, "reconnect failed");
                }
            }
            // Recorded environment is gone: one expiry notice, then forget it
            inner.recorded_environment_id = None;
            metrics::ENVIRONMENT_EXPIRIES.inc();
            warn!(session_key, environment_id = %environment_id, "recorded environment is dead");
            self.broadcaster.publish(ActivityEvent::now(
                session_key,
                ActivityKind::EnvironmentExpired {
                    environment_id: environment_id.clone(),
                },
            ));
            return Err(SandboxError::Expired(environment_id));
        }

        // (c) nothing to acquire
        Err(SandboxError::NoEnvironment)
    }

    /// Install a live handle and spawn its keep-alive task. Caller holds
    /// the slot lock.
    fn install_locked(
        &self,
        session_key: &str,
        slot: &Arc<SessionSlot<E::Handle>>,
        inner: &mut SlotInner<E::Handle>,
        environment_id: String,
        handle: E::Handle,
    ) {
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let mut live = LiveSandbox::new(environment_id.clone(), handle, generation);
        live.keepalive = Some(self.spawn_keepalive(
            session_key.to_string(),
            Arc::clone(slot),
            generation,
        ));
        inner.recorded_environment_id = Some(environment_id);
        inner.live = Some(live);
    }

    /// Discard a dead handle under the slot lock: cancel its keep-alive,
    /// forget the recorded identifier, emit EnvironmentExpired once.
    fn expire_locked(&self, session_key: &str, inner: &mut SlotInner<E::Handle>) {
        let Some(mut live) = inner.live.take() else {
            return;
        };
        live.cancel_keepalive();
        live.state = SandboxState::Expired;
        inner.recorded_environment_id = None;
        metrics::ENVIRONMENT_EXPIRIES.inc();
        warn!(session_key, environment_id = %live.environment_id, "environment expired");
        self.broadcaster.publish(ActivityEvent::now(
            session_key,
            ActivityKind::EnvironmentExpired {
                environment_id: live.environment_id.clone(),
            },
        ));
    }

    /// Periodic liveness probe for one installed handle. Only acts while
    /// the slot still holds its own generation; a replaced or removed
    /// handle ends the task silently.
    fn spawn_keepalive(
        &self,
        session_key: String,
        slot: Arc<SessionSlot<E::Handle>>,
        generation: u64,
    ) -> JoinHandle<()> {
        let env = Arc::clone(&self.env);
        let broadcaster = Arc::clone(&self.broadcaster);
        let budget = self.config.lifetime_budget;
        let probe_timeout = self.config.probe_timeout;
        let period = self.config.probe_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick completes immediately

            loop {
                interval.tick().await;

                let snapshot = {
                    let inner = slot.inner.lock().await;
                    match inner.live.as_ref() {
                        Some(live) if live.generation == generation => {
                            Some((live.handle.clone(), live.created_at))
                        }
                        _ => None,
                    }
                };
                let Some((handle, created_at)) = snapshot else {
                    break; // handle replaced or removed; stale timer stands down
                };

                let alive = if created_at.elapsed() >= budget {
                    false
                } else {
                    matches!(timeout(probe_timeout, env.probe(&handle)).await, Ok(Ok(true)))
                };
                metrics::KEEPALIVE_PROBES
                    .with_label_values(&[if alive { "alive" } else { "dead" }])
                    .inc();

                let mut inner = slot.inner.lock().await;
                let current = inner
                    .live
                    .as_ref()
                    .map(|live| live.generation == generation)
                    .unwrap_or(false);
                if !current {
                    break;
                }
                if alive {
                    if let Some(live) = inner.live.as_mut() {
                        live.refresh();
                    }
                    continue;
                }

                // Same single-removal guard as acquire: only the holder that
                // observes its own generation takes the handle out.
                if let Some(mut dead) = inner.live.take() {
                    dead.cancel_keepalive();
                    dead.state = SandboxState::Expired;
                    inner.recorded_environment_id = None;
                    metrics::ENVIRONMENT_EXPIRIES.inc();
                    warn!(
                        session_key = %session_key,
                        environment_id = %dead.environment_id,
                        "keep-alive probe failed; environment expired"
                    );
                    broadcaster.publish(ActivityEvent::now(
                        session_key.clone(),
                        ActivityKind::EnvironmentExpired {
                            environment_id: dead.environment_id.clone(),
                        },
                    ));
                }
                break;
            }
        })
    }
}
