#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use trip_orchestrator::agents::{Agent, Skill, SkillOutput};
use trip_orchestrator::error::{LlmError, SkillError};
use trip_orchestrator::llm::{ChatMessage, TextCompletion};
use trip_orchestrator::protocol::{Broker, Payload};

/// Answers with a fixed data object.
pub struct FixedSkill {
    pub name: String,
    pub data: Value,
}

#[async_trait]
impl Skill for FixedSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "returns fixed data"
    }

    async fn run(&self, _payload: Payload) -> Result<SkillOutput, SkillError> {
        Ok(SkillOutput::new(self.data.clone()))
    }
}

pub struct RaisingSkill {
    pub name: String,
    pub message: String,
}

#[async_trait]
impl Skill for RaisingSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "always raises"
    }

    async fn run(&self, _payload: Payload) -> Result<SkillOutput, SkillError> {
        Err(SkillError::msg(self.message.clone()))
    }
}

/// Sleeps, then answers with `{"<name>_result": "done"}`.
pub struct SleepySkill {
    pub name: String,
    pub delay: Duration,
}

#[async_trait]
impl Skill for SleepySkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "sleeps"
    }

    async fn run(&self, _payload: Payload) -> Result<SkillOutput, SkillError> {
        tokio::time::sleep(self.delay).await;
        let mut data = Payload::new();
        data.insert(format!("{}_result", self.name), json!("done"));
        Ok(SkillOutput::new(Value::Object(data)))
    }
}

pub fn fixed(broker: &Arc<Broker>, name: &str, data: Value) -> Arc<Agent> {
    let skill = FixedSkill {
        name: name.to_string(),
        data,
    };
    Agent::new(Arc::new(skill), broker, 4).expect("agent registers")
}

pub fn raising(broker: &Arc<Broker>, name: &str, message: &str) -> Arc<Agent> {
    let skill = RaisingSkill {
        name: name.to_string(),
        message: message.to_string(),
    };
    Agent::new(Arc::new(skill), broker, 4).expect("agent registers")
}

pub fn sleepy(broker: &Arc<Broker>, name: &str, delay: Duration) -> Arc<Agent> {
    let skill = SleepySkill {
        name: name.to_string(),
        delay,
    };
    Agent::new(Arc::new(skill), broker, 4).expect("agent registers")
}

/// Scripted completion that records every prompt it receives.
pub struct ScriptedCompletion {
    reply: Result<String, LlmError>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(LlmError::Transport(message.to_string())),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TextCompletion for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().push(prompt);
        self.reply.clone()
    }
}

pub fn stages(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
