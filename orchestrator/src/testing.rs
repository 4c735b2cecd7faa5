// Skills and completion doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::agents::{Agent, Skill, SkillOutput};
use crate::error::{LlmError, SkillError};
use crate::llm::{ChatMessage, TextCompletion};
use crate::protocol::{Broker, Payload};

/// Register an echoing agent with the given name.
pub fn agent_named(broker: &Arc<Broker>, name: &str) -> Arc<Agent> {
    Agent::new(Arc::new(EchoSkill::named(name)), broker, 4).expect("agent registers")
}

/// Returns its payload as data.
pub struct EchoSkill {
    name: String,
}

impl EchoSkill {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl Skill for EchoSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "echoes its input"
    }

    async fn run(&self, payload: Payload) -> Result<SkillOutput, SkillError> {
        Ok(SkillOutput::new(Value::Object(payload)).with_message("echoed"))
    }
}

pub struct FailingSkill {
    name: String,
    message: String,
}

impl FailingSkill {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Skill for FailingSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn run(&self, _payload: Payload) -> Result<SkillOutput, SkillError> {
        Err(SkillError::msg(self.message.clone()))
    }
}

pub struct PanickingSkill {
    name: String,
}

impl PanickingSkill {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl Skill for PanickingSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "panics"
    }

    async fn run(&self, _payload: Payload) -> Result<SkillOutput, SkillError> {
        panic!("{} panicked", self.name);
    }
}

/// Sleeps before echoing, tracking how many runs overlap.
pub struct SlowSkill {
    name: String,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowSkill {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Skill for SlowSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "takes its time"
    }

    async fn run(&self, payload: Payload) -> Result<SkillOutput, SkillError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(SkillOutput::new(Value::Object(payload)))
    }
}

/// Answers every completion with the same text and remembers the last prompt.
pub struct StaticCompletion {
    text: String,
    last_prompt: Mutex<Option<String>>,
}

impl StaticCompletion {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }
}

#[async_trait]
impl TextCompletion for StaticCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone());
        *self.last_prompt.lock() = prompt;
        Ok(self.text.clone())
    }
}

pub struct FailingCompletion {
    message: String,
}

impl FailingCompletion {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl TextCompletion for FailingCompletion {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        Err(LlmError::Transport(self.message.clone()))
    }
}
