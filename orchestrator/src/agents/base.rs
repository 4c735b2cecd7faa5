// Agent base: lifecycle wrapper around a skill.
//
// `execute` is the one seam where every skill failure (error or panic) turns
// into an `AgentResponse`; nothing escapes it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{panic_message, Result, SkillError};
use crate::metrics;
use crate::protocol::{
    handler_fn, Broker, Message, Payload, Priority, ResponseMessage,
};

pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Processing,
    Completed,
    Error,
}

/// Uniform result of `Agent::execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub data: Value,
    pub message: String,
    pub agent_name: String,
    /// Seconds.
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Payload,
}

impl AgentResponse {
    pub fn success(agent_name: impl Into<String>, data: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
            agent_name: agent_name.into(),
            execution_time: 0.0,
            timestamp: Utc::now(),
            metadata: Payload::new(),
        }
    }

    pub fn failure(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            message: message.into(),
            agent_name: agent_name.into(),
            execution_time: 0.0,
            timestamp: Utc::now(),
            metadata: Payload::new(),
        }
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed.as_secs_f64();
        self
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// What a skill hands back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkillOutput {
    pub data: Value,
    pub message: String,
    pub metadata: Payload,
}

impl SkillOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            message: "ok".to_string(),
            metadata: Payload::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Task-specific logic plugged into an `Agent`.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn run(&self, payload: Payload) -> std::result::Result<SkillOutput, SkillError>;
}

/// A closed set of actions an agent answers on the broker. Dispatch over it is
/// an exhaustive `match`, so adding a variant without handling it fails to
/// compile.
pub trait ActionSet: Copy + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn name(self) -> &'static str;

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|action| action.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub name: String,
    pub description: String,
    pub status: AgentStatus,
    pub execution_count: u64,
    pub error_count: u64,
    /// Mean seconds per successful execution.
    pub average_execution_time: f64,
}

pub struct Agent {
    skill: Arc<dyn Skill>,
    broker: Weak<Broker>,
    status: Mutex<AgentStatus>,
    execution_count: AtomicU64,
    error_count: AtomicU64,
    total_execution_micros: AtomicU64,
    permits: Semaphore,
}

/// Settles an execution whose future was dropped before the skill returned,
/// as happens on a request timeout or a cancelled run.
struct InFlight<'a> {
    agent: &'a Agent,
    started: Instant,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let agent = self.agent;
        agent
            .total_execution_micros
            .fetch_add(self.started.elapsed().as_micros() as u64, Ordering::Relaxed);
        *agent.status.lock() = AgentStatus::Error;
        agent.error_count.fetch_add(1, Ordering::Relaxed);
        metrics::record_agent_execution(agent.name(), "cancelled");
        warn!(agent = %agent.name(), "Agent execution dropped before completion");
    }
}

impl Agent {
    /// Build an agent and register it with the broker. Fails if the name is
    /// already taken.
    pub fn new(
        skill: Arc<dyn Skill>,
        broker: &Arc<Broker>,
        max_concurrency: usize,
    ) -> Result<Arc<Self>> {
        let agent = Self::detached(skill, broker, max_concurrency);
        broker.register_agent(agent.clone())?;
        Ok(agent)
    }

    /// Build an agent bound to `broker` without registering it.
    pub fn detached(skill: Arc<dyn Skill>, broker: &Arc<Broker>, max_concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            skill,
            broker: Arc::downgrade(broker),
            status: Mutex::new(AgentStatus::Idle),
            execution_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_execution_micros: AtomicU64::new(0),
            permits: Semaphore::new(max_concurrency.max(1)),
        })
    }

    pub fn name(&self) -> &str {
        self.skill.name()
    }

    pub fn description(&self) -> &str {
        self.skill.description()
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.lock()
    }

    pub fn skill(&self) -> Arc<dyn Skill> {
        self.skill.clone()
    }

    /// Run the skill. Concurrent calls beyond the agent's bound queue here.
    pub async fn execute(&self, payload: Payload) -> AgentResponse {
        let Ok(_permit) = self.permits.acquire().await else {
            return AgentResponse::failure(self.name(), "agent is shut down");
        };

        let mut in_flight = InFlight {
            agent: self,
            started: Instant::now(),
            settled: false,
        };
        *self.status.lock() = AgentStatus::Processing;

        let outcome = AssertUnwindSafe(self.skill.run(payload)).catch_unwind().await;
        in_flight.settled = true;
        let elapsed = in_flight.started.elapsed();
        self.total_execution_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let failure = match outcome {
            Ok(Ok(output)) => {
                *self.status.lock() = AgentStatus::Completed;
                self.execution_count.fetch_add(1, Ordering::Relaxed);
                metrics::record_agent_execution(self.name(), "success");
                info!(
                    agent = %self.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Agent execution completed"
                );
                return AgentResponse::success(self.name(), output.data, output.message)
                    .with_execution_time(elapsed)
                    .with_metadata(output.metadata);
            }
            Ok(Err(err)) => err.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        *self.status.lock() = AgentStatus::Error;
        self.error_count.fetch_add(1, Ordering::Relaxed);
        metrics::record_agent_execution(self.name(), "error");
        error!(agent = %self.name(), error = %failure, "Agent execution failed");
        AgentResponse::failure(self.name(), failure).with_execution_time(elapsed)
    }

    /// Register `f(payload)` as the broker handler for `action` on this agent.
    /// The wrapper builds the success or failure response and correlates it
    /// with the request; object results become the response payload, other
    /// values are wrapped as `{"result": value}`.
    pub fn register_action_handler<F, Fut>(&self, action: &str, f: F) -> Result<bool>
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, SkillError>> + Send + 'static,
    {
        let broker = self.broker()?;
        let agent_name = self.name().to_string();
        let f = Arc::new(f);
        let handler = handler_fn(move |message: Message| {
            let f = f.clone();
            let agent_name = agent_name.clone();
            async move {
                let envelope = message.into_envelope();
                let action = envelope.action.clone();
                let result = f(envelope.payload.clone()).await;
                Ok(match result {
                    Ok(Value::Object(map)) => ResponseMessage::reply_to(&envelope, map),
                    Ok(other) => {
                        let mut payload = Payload::new();
                        payload.insert("result".into(), other);
                        ResponseMessage::reply_to(&envelope, payload)
                    }
                    Err(err) => {
                        error!(agent = %agent_name, action = %action, error = %err, "Action handler failed");
                        ResponseMessage::failure_to(&envelope, err.to_string())
                    }
                })
            }
        });
        Ok(broker.register_handler(self.name(), action, handler))
    }

    /// Register one handler per variant of `A`, all funnelled through
    /// `dispatch`.
    pub fn register_actions<A, F>(&self, dispatch: F) -> Result<()>
    where
        A: ActionSet,
        F: Fn(A, Payload) -> BoxFuture<'static, std::result::Result<Value, SkillError>>
            + Clone
            + Send
            + Sync
            + 'static,
    {
        for &action in A::ALL {
            let dispatch = dispatch.clone();
            self.register_action_handler(action.name(), move |payload| dispatch(action, payload))?;
        }
        Ok(())
    }

    pub async fn send_request(
        &self,
        to_agent: &str,
        action: &str,
        payload: Payload,
        timeout: Option<Duration>,
        priority: Priority,
    ) -> ResponseMessage {
        match self.broker.upgrade() {
            Some(broker) => {
                broker
                    .send_request(self.name(), to_agent, action, payload, timeout, priority)
                    .await
            }
            None => ResponseMessage::failure(
                to_agent,
                self.name(),
                action,
                uuid::Uuid::nil(),
                "broker unavailable",
            ),
        }
    }

    pub async fn send_notification(
        &self,
        to_agent: &str,
        action: &str,
        payload: Payload,
        priority: Priority,
    ) {
        if let Some(broker) = self.broker.upgrade() {
            broker
                .send_notification(self.name(), to_agent, action, payload, priority)
                .await;
        }
    }

    pub fn capabilities(&self) -> AgentCapabilities {
        let execution_count = self.execution_count.load(Ordering::Relaxed);
        let total_secs = self.total_execution_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        AgentCapabilities {
            name: self.name().to_string(),
            description: self.description().to_string(),
            status: self.status(),
            execution_count,
            error_count: self.error_count.load(Ordering::Relaxed),
            average_execution_time: if execution_count > 0 {
                total_secs / execution_count as f64
            } else {
                0.0
            },
        }
    }

    fn broker(&self) -> Result<Arc<Broker>> {
        self.broker
            .upgrade()
            .ok_or_else(|| crate::error::OrchestratorError::AgentNotFound(format!("{} (broker dropped)", self.name())))
    }
}

/// Actions every travel skill answers on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillAction {
    Execute,
    Capabilities,
}

impl ActionSet for SkillAction {
    const ALL: &'static [Self] = &[SkillAction::Execute, SkillAction::Capabilities];

    fn name(self) -> &'static str {
        match self {
            SkillAction::Execute => "execute",
            SkillAction::Capabilities => "capabilities",
        }
    }
}

/// Expose `agent` on the broker: `execute` runs the skill through the agent
/// (so counters and the concurrency bound apply), `capabilities` describes it.
pub fn expose_skill_actions(agent: &Arc<Agent>) -> Result<()> {
    let target = Arc::downgrade(agent);
    agent.register_actions(move |action: SkillAction, payload: Payload| {
        let target = target.clone();
        async move {
            let agent = target
                .upgrade()
                .ok_or_else(|| SkillError::msg("agent dropped"))?;
            match action {
                SkillAction::Execute => {
                    let response = agent.execute(payload).await;
                    if response.success {
                        Ok(json!({ "data": response.data, "message": response.message }))
                    } else {
                        Err(SkillError::msg(response.message))
                    }
                }
                SkillAction::Capabilities => Ok(serde_json::to_value(agent.capabilities())
                    .map_err(|e| SkillError::msg(e.to_string()))?),
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{agent_named, EchoSkill, FailingSkill, PanickingSkill, SlowSkill};
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_execute_success_updates_counters() {
        let broker = Broker::new_shared(None);
        let agent = agent_named(&broker, "route");

        let response = agent.execute(payload(json!({"from": "Lhasa"}))).await;

        assert!(response.success);
        assert_eq!(response.agent_name, "route");
        assert_eq!(response.data["from"], "Lhasa");
        let caps = agent.capabilities();
        assert_eq!(caps.status, AgentStatus::Completed);
        assert_eq!(caps.execution_count, 1);
        assert_eq!(caps.error_count, 0);
    }

    #[tokio::test]
    async fn test_execute_converts_error_into_failure() {
        let broker = Broker::new_shared(None);
        let agent = Agent::new(Arc::new(FailingSkill::new("budget", "boom")), &broker, 2).unwrap();

        let response = agent.execute(Payload::new()).await;

        assert!(!response.success);
        assert_eq!(response.message, "boom");
        assert_eq!(response.data, Value::Null);
        assert_eq!(agent.status(), AgentStatus::Error);
        let caps = agent.capabilities();
        assert_eq!(caps.execution_count, 0);
        assert_eq!(caps.error_count, 1);
        assert_eq!(caps.average_execution_time, 0.0);
    }

    #[tokio::test]
    async fn test_execute_contains_panics() {
        let broker = Broker::new_shared(None);
        let agent = Agent::new(Arc::new(PanickingSkill::new("poi")), &broker, 1).unwrap();

        let response = agent.execute(Payload::new()).await;

        assert!(!response.success);
        assert!(response.message.contains("poi panicked"));
        assert_eq!(agent.status(), AgentStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_queues_excess_calls() {
        let broker = Broker::new_shared(None);
        let skill = Arc::new(SlowSkill::new("weather", Duration::from_millis(100)));
        let agent = Agent::new(skill.clone(), &broker, 2).unwrap();

        let calls: Vec<_> = (0..5).map(|_| agent.execute(Payload::new())).collect();
        let responses = futures::future::join_all(calls).await;

        assert!(responses.iter().all(|r| r.success));
        assert_eq!(skill.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_action_handler_wraps_results() {
        let broker = Broker::new_shared(None);
        let agent = agent_named(&broker, "budget");
        agent
            .register_action_handler("total", |payload: Payload| async move {
                let nights = payload.get("nights").and_then(Value::as_u64).unwrap_or(0);
                Ok(json!(nights * 300))
            })
            .unwrap();
        agent
            .register_action_handler("split", |_payload: Payload| async move {
                Err(SkillError::msg("no travellers"))
            })
            .unwrap();

        let total = agent
            .send_request("budget", "total", payload(json!({"nights": 3})), None, Priority::Normal)
            .await;
        assert!(total.success);
        assert_eq!(total.envelope.payload["result"], 900);
        assert_eq!(total.envelope.from_agent, "budget");

        let split = broker
            .send_request("router", "budget", "split", Payload::new(), None, Priority::Normal)
            .await;
        assert!(!split.success);
        assert_eq!(split.error.as_deref(), Some("no travellers"));
    }

    #[tokio::test]
    async fn test_exposed_skill_actions_go_through_execute() {
        let broker = Broker::new_shared(None);
        let agent = Agent::new(Arc::new(EchoSkill::named("lodging")), &broker, 1).unwrap();
        expose_skill_actions(&agent).unwrap();

        let response = broker
            .send_request(
                "router",
                "lodging",
                "execute",
                payload(json!({"city": "Dali"})),
                None,
                Priority::Normal,
            )
            .await;
        assert!(response.success);
        assert_eq!(response.envelope.payload["data"]["city"], "Dali");
        assert_eq!(agent.capabilities().execution_count, 1);

        let caps = broker
            .send_request("router", "lodging", "capabilities", Payload::new(), None, Priority::Low)
            .await;
        assert_eq!(caps.envelope.payload["name"], "lodging");
        assert_eq!(caps.envelope.payload["execution_count"], 1);
        assert_eq!(broker.registry().actions("lodging"), vec!["capabilities", "execute"]);
    }

    #[test]
    fn test_action_set_parse() {
        assert_eq!(SkillAction::parse("execute"), Some(SkillAction::Execute));
        assert_eq!(SkillAction::parse("capabilities"), Some(SkillAction::Capabilities));
        assert_eq!(SkillAction::parse("dance"), None);
    }

    #[tokio::test]
    async fn test_send_request_after_broker_dropped_fails_cleanly() {
        let broker = Broker::new_shared(None);
        let agent = Agent::detached(Arc::new(EchoSkill::named("route")), &broker, 1);
        drop(broker);

        let response = agent
            .send_request("weather", "forecast", Payload::new(), None, Priority::Normal)
            .await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("broker unavailable"));
    }

    #[tokio::test]
    async fn test_send_notification_reaches_target_handler() {
        let broker = Broker::new_shared(None);
        let agent = agent_named(&broker, "router");
        let _weather = agent_named(&broker, "weather");
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        broker.register_handler(
            "weather",
            "refresh",
            handler_fn(move |message: Message| {
                let sink = sink.clone();
                async move {
                    let envelope = message.into_envelope();
                    let city = envelope.payload["city"].clone();
                    sink.lock().push((envelope.from_agent.clone(), city));
                    Ok(ResponseMessage::reply_to(&envelope, Payload::new()))
                }
            }),
        );

        agent
            .send_notification("weather", "refresh", payload(json!({"city": "Lhasa"})), Priority::Low)
            .await;

        assert_eq!(*seen.lock(), vec![("router".to_string(), json!("Lhasa"))]);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_notification_after_broker_dropped_is_a_no_op() {
        let broker = Broker::new_shared(None);
        let agent = Agent::detached(Arc::new(EchoSkill::named("router")), &broker, 1);
        drop(broker);

        agent
            .send_notification("weather", "refresh", Payload::new(), Priority::Normal)
            .await;
        assert_eq!(agent.capabilities().execution_count, 0);
    }
}
