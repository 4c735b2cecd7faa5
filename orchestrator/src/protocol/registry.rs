// Agent registry and per-agent handler tables.
//
// One registry lives inside each `Broker`; it is created at startup and
// handed to every component through the broker rather than living in a
// process-wide global.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::message::{Message, ResponseMessage};
use crate::agents::Agent;
use crate::error::{OrchestratorError, Result, SkillError};

/// Asynchronous message handler registered under `(agent, action)`.
///
/// Requests get the returned response (with `original_request_id` forced to
/// the request's id); for notifications the return value is discarded.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: Message) -> std::result::Result<ResponseMessage, SkillError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<ResponseMessage, SkillError>> + Send,
{
    async fn handle(&self, message: Message) -> std::result::Result<ResponseMessage, SkillError> {
        (self.0)(message).await
    }
}

/// Wrap an async closure as a `Handler`.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ResponseMessage, SkillError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

type HandlerTable = HashMap<String, Arc<dyn Handler>>;

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    handlers: RwLock<HashMap<String, HandlerTable>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its name. A second agent with the same name is
    /// rejected instead of silently replacing the first.
    pub fn register_agent(&self, agent: Arc<Agent>) -> Result<()> {
        let name = agent.name().to_string();
        {
            let mut agents = self.agents.write();
            if agents.contains_key(&name) {
                warn!(agent = %name, "Rejected duplicate agent registration");
                return Err(OrchestratorError::DuplicateAgent(name));
            }
            agents.insert(name.clone(), agent);
        }
        self.handlers.write().entry(name.clone()).or_default();
        info!(agent = %name, "Registered agent");
        Ok(())
    }

    /// Remove an agent together with its handler table.
    pub fn unregister_agent(&self, name: &str) -> bool {
        let removed = self.agents.write().remove(name).is_some();
        self.handlers.write().remove(name);
        if removed {
            info!(agent = %name, "Unregistered agent");
        }
        removed
    }

    pub fn agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    /// Registered agent names, sorted.
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Insert or replace the handler for `(agent_name, action)`. Returns true
    /// when an existing handler was replaced.
    pub fn register_handler(
        &self,
        agent_name: &str,
        action: &str,
        handler: Arc<dyn Handler>,
    ) -> bool {
        let replaced = self
            .handlers
            .write()
            .entry(agent_name.to_string())
            .or_default()
            .insert(action.to_string(), handler)
            .is_some();

        if replaced {
            warn!(agent = %agent_name, action = %action, "Replaced existing handler");
        } else {
            info!(agent = %agent_name, action = %action, "Registered handler");
        }
        replaced
    }

    pub fn handler(&self, agent_name: &str, action: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .get(agent_name)
            .and_then(|table| table.get(action))
            .cloned()
    }

    /// Actions registered for an agent, sorted.
    pub fn actions(&self, agent_name: &str) -> Vec<String> {
        let mut actions: Vec<String> = self
            .handlers
            .read()
            .get(agent_name)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default();
        actions.sort();
        actions
    }
}
