use std::sync::LazyLock;

use prometheus::{IntCounterVec, Opts};

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("static metric definition is valid");
    // Registration only fails if the name is already taken, e.g. when the
    // library is linked twice in one test binary; the counter still works.
    let _ = prometheus::register(Box::new(counter.clone()));
    counter
}

static BROKER_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "broker_requests_total",
        "Requests routed by the broker, by outcome",
        &["outcome"],
    )
});

static AGENT_EXECUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "agent_executions_total",
        "Agent executions, by agent and outcome",
        &["agent", "outcome"],
    )
});

static PIPELINE_STAGES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "pipeline_stages_total",
        "Pipeline stage outcomes, by stage",
        &["stage", "outcome"],
    )
});

static PIPELINE_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "pipeline_runs_total",
        "Pipeline runs, by terminal status",
        &["status"],
    )
});

static ROUTER_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "router_decisions_total",
        "Router intent decisions, by deciding phase",
        &["source"],
    )
});

pub fn record_broker_request(outcome: &str) {
    BROKER_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_agent_execution(agent: &str, outcome: &str) {
    AGENT_EXECUTIONS.with_label_values(&[agent, outcome]).inc();
}

pub fn record_stage(stage: &str, outcome: &str) {
    PIPELINE_STAGES.with_label_values(&[stage, outcome]).inc();
}

pub fn record_run(status: &str) {
    PIPELINE_RUNS.with_label_values(&[status]).inc();
}

pub fn record_router_decision(source: &str) {
    ROUTER_DECISIONS.with_label_values(&[source]).inc();
}

/// Text exposition of the default registry.
pub fn render() -> (Vec<u8>, String) {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    (buffer, encoder.format_type().to_string())
}
