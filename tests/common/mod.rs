//! Shared test doubles: an in-memory execution environment and a scripted
//! completion port.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use appforge::broadcast::ActivityEvent;
use appforge::llm::{ChatError, ChatMessage, Completion, CompletionTurn, Tool, ToolCall};
use appforge::sandbox::{DirEntry, ExecOutput, ExecutionEnvironment, PortError};

/// Handle to one mock environment: a shared in-memory filesystem plus a
/// liveness flag.
#[derive(Clone)]
pub struct MockHandle {
    pub environment_id: String,
    fs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    alive: Arc<AtomicBool>,
}

/// In-memory execution environment with call counters and failure knobs.
///
/// `run` understands just enough shell for the tests: `mkdir -p`, `cat`,
/// `echo`, and `false`; anything else succeeds silently.
pub struct MockEnv {
    pub create_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub detached_commands: Mutex<Vec<String>>,
    environments: Mutex<HashMap<String, MockHandle>>,
    next_id: AtomicUsize,
    create_delay: Duration,
    fail_create: AtomicBool,
    fail_destroy: AtomicBool,
}

impl MockEnv {
    pub fn new() -> Self {
        Self::with_create_delay(Duration::ZERO)
    }

    /// Widen the race window on create so concurrency tests are meaningful
    pub fn with_create_delay(create_delay: Duration) -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            detached_commands: Mutex::new(Vec::new()),
            environments: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
            create_delay,
            fail_create: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }

    /// Simulate the provider killing an environment out from under us
    pub fn kill(&self, environment_id: &str) {
        let environments = self.environments.lock().unwrap();
        if let Some(handle) = environments.get(environment_id) {
            handle.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Write a file straight into an environment's filesystem
    pub fn write(&self, environment_id: &str, path: &str, bytes: &[u8]) {
        let environments = self.environments.lock().unwrap();
        if let Some(handle) = environments.get(environment_id) {
            handle
                .fs
                .lock()
                .unwrap()
                .insert(path.to_string(), bytes.to_vec());
        }
    }

    /// Read a file straight out of an environment's filesystem
    pub fn read(&self, environment_id: &str, path: &str) -> Option<Vec<u8>> {
        let environments = self.environments.lock().unwrap();
        let handle = environments.get(environment_id)?;
        let fs = handle.fs.lock().unwrap();
        fs.get(path).cloned()
    }
}

fn exec(stdout: &str, stderr: &str, exit_code: i32) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

#[async_trait]
impl ExecutionEnvironment for MockEnv {
    type Handle = MockHandle;

    async fn create(
        &self,
        _lifetime_budget: Duration,
    ) -> Result<(String, Self::Handle), PortError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PortError::Failed("quota exceeded".to_string()));
        }
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        let environment_id = format!("env-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let handle = MockHandle {
            environment_id: environment_id.clone(),
            fs: Arc::new(Mutex::new(HashMap::new())),
            alive: Arc::new(AtomicBool::new(true)),
        };
        self.environments
            .lock()
            .unwrap()
            .insert(environment_id.clone(), handle.clone());
        Ok((environment_id, handle))
    }

    async fn connect(&self, environment_id: &str) -> Result<Self::Handle, PortError> {
        let environments = self.environments.lock().unwrap();
        match environments.get(environment_id) {
            Some(handle) if handle.alive.load(Ordering::SeqCst) => Ok(handle.clone()),
            _ => Err(PortError::NotFound(environment_id.to_string())),
        }
    }

    async fn probe(&self, handle: &Self::Handle) -> Result<bool, PortError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(handle.alive.load(Ordering::SeqCst))
    }

    async fn run(
        &self,
        handle: &Self::Handle,
        command: &str,
        _timeout: Duration,
    ) -> Result<ExecOutput, PortError> {
        if !handle.alive.load(Ordering::SeqCst) {
            return Err(PortError::Failed("environment is dead".to_string()));
        }
        let command = command.trim();

        if command.starts_with("mkdir -p") {
            return Ok(exec("", "", 0));
        }
        if command == "false" {
            return Ok(exec("", "", 1));
        }
        if let Some(rest) = command.strip_prefix("cat ") {
            let path = rest.trim().trim_matches('\'').trim_matches('"');
            let fs = handle.fs.lock().unwrap();
            return Ok(match fs.get(path) {
                Some(bytes) => exec(&String::from_utf8_lossy(bytes), "", 0),
                None => exec(
                    "",
                    &format!("cat: {}: No such file or directory", path),
                    1,
                ),
            });
        }
        if let Some(rest) = command.strip_prefix("echo ") {
            return Ok(exec(rest, "", 0));
        }
        Ok(exec("", "", 0))
    }

    async fn run_detached(&self, handle: &Self::Handle, command: &str) -> Result<(), PortError> {
        if !handle.alive.load(Ordering::SeqCst) {
            return Err(PortError::Failed("environment is dead".to_string()));
        }
        self.detached_commands
            .lock()
            .unwrap()
            .push(command.to_string());
        Ok(())
    }

    async fn write_file(
        &self,
        handle: &Self::Handle,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), PortError> {
        if !handle.alive.load(Ordering::SeqCst) {
            return Err(PortError::Failed("environment is dead".to_string()));
        }
        handle
            .fs
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&self, handle: &Self::Handle, path: &str) -> Result<Vec<u8>, PortError> {
        let fs = handle.fs.lock().unwrap();
        fs.get(path)
            .cloned()
            .ok_or_else(|| PortError::NotFound(path.to_string()))
    }

    async fn list_dir(
        &self,
        handle: &Self::Handle,
        path: &str,
    ) -> Result<Vec<DirEntry>, PortError> {
        let prefix = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let fs = handle.fs.lock().unwrap();
        let mut entries = Vec::new();
        for key in fs.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    Some((dir, _)) => {
                        if !entries
                            .iter()
                            .any(|e: &DirEntry| e.name == dir && e.is_dir)
                        {
                            entries.push(DirEntry {
                                name: dir.to_string(),
                                is_dir: true,
                            });
                        }
                    }
                    None => entries.push(DirEntry {
                        name: rest.to_string(),
                        is_dir: false,
                    }),
                }
            }
        }
        Ok(entries)
    }

    async fn exposed_address(
        &self,
        handle: &Self::Handle,
        port: u16,
    ) -> Result<String, PortError> {
        Ok(format!(
            "https://{}-{}.sandbox.test",
            handle.environment_id, port
        ))
    }

    async fn destroy(&self, handle: &Self::Handle) -> Result<(), PortError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(PortError::Failed("destroy rejected".to_string()));
        }
        handle.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Completion port that plays back a fixed script of turns and records
/// every conversation it was shown.
pub struct ScriptedCompletion {
    turns: Mutex<VecDeque<CompletionTurn>>,
    repeat_last: bool,
    fail: bool,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    pub fn new(turns: Vec<CompletionTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat_last: false,
            fail: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always returns the same turn; models a loop that never terminates
    pub fn repeating(turn: CompletionTurn) -> Self {
        Self {
            turns: Mutex::new(vec![turn].into()),
            repeat_last: true,
            fail: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call, as a dead completion backend would
    pub fn failing() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            repeat_last: false,
            fail: true,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Conversations shown to the model, in call order
    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn next_turn(
        &self,
        conversation: &[ChatMessage],
        _tools: &[Tool],
    ) -> Result<CompletionTurn, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(conversation.to_vec());
        if self.fail {
            return Err(ChatError::Service(
                "completion backend unavailable".to_string(),
            ));
        }
        let mut turns = self.turns.lock().unwrap();
        if self.repeat_last {
            return turns
                .front()
                .cloned()
                .ok_or_else(|| ChatError::Service("script is empty".to_string()));
        }
        turns
            .pop_front()
            .ok_or_else(|| ChatError::Service("script exhausted".to_string()))
    }
}

pub fn turn(text: &str, tool_calls: Vec<ToolCall>) -> CompletionTurn {
    CompletionTurn {
        text: text.to_string(),
        tool_calls,
    }
}

pub fn write_file_call(path: &str, content: &str) -> ToolCall {
    ToolCall::new(
        "write_file",
        serde_json::json!({"path": path, "content": content}),
    )
}

pub fn run_command_call(command: &str) -> ToolCall {
    ToolCall::new("run_command", serde_json::json!({ "command": command }))
}

/// Collect everything currently buffered on an event receiver
pub fn drain_events(rx: &mut broadcast::Receiver<ActivityEvent>) -> Vec<ActivityEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
