//! Prometheus metrics for observability
//!
//! All metrics live in the default registry; a host process can expose
//! them however it likes (the core does not serve an endpoint itself).

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

lazy_static! {
    /// Chat invocations by outcome: success, capped, completion_error, provision_error
    pub static ref CHAT_TASKS: IntCounterVec = register_int_counter_vec!(
        "appforge_chat_tasks_total",
        "Chat invocations by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Completion round-trips per chat invocation
    pub static ref CHAT_ITERATIONS: Histogram = register_histogram!(
        "appforge_chat_iterations",
        "Completion round-trips per chat invocation",
        vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0]
    )
    .unwrap();

    /// Tool dispatches by tool name and outcome (success, tool_error)
    pub static ref TOOL_CALLS: IntCounterVec = register_int_counter_vec!(
        "appforge_tool_calls_total",
        "Tool dispatches by tool and outcome",
        &["tool", "outcome"]
    )
    .unwrap();

    /// Environment provisioning attempts by outcome (created, reused, failed)
    pub static ref PROVISIONS: IntCounterVec = register_int_counter_vec!(
        "appforge_provisions_total",
        "Environment provisioning attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Environments discovered dead (probe failure or budget elapsed)
    pub static ref ENVIRONMENT_EXPIRIES: IntCounter = register_int_counter!(
        "appforge_environment_expiries_total",
        "Environments discovered dead"
    )
    .unwrap();

    /// Keep-alive probes by result (alive, dead)
    pub static ref KEEPALIVE_PROBES: IntCounterVec = register_int_counter_vec!(
        "appforge_keepalive_probes_total",
        "Keep-alive probes by result",
        &["result"]
    )
    .unwrap();

    /// Wall time of run_command tool executions in seconds
    pub static ref COMMAND_DURATION: Histogram = register_histogram!(
        "appforge_command_duration_seconds",
        "Wall time of run_command tool executions"
    )
    .unwrap();
}
