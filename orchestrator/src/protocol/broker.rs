// In-process message broker.
//
// Routes messages to registered handlers and correlates requests with
// responses through pending slots keyed by `request_id`. Handlers run inline
// on the caller's task; abandoning a request (timeout or cancel) drops the
// handler future, which cancels the in-flight handler with it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::message::{
    Message, NotificationMessage, Payload, Priority, RequestMessage, ResponseMessage,
};
use super::registry::{AgentRegistry, Handler};
use crate::agents::Agent;
use crate::error::{panic_message, Result};
use crate::metrics;

pub const ERR_AGENT_NOT_FOUND: &str = "agent not found";
pub const ERR_NO_HANDLER: &str = "no handler for action";
pub const ERR_TIMEOUT: &str = "request timeout";
pub const ERR_CANCELLED: &str = "request cancelled";
pub const ERR_DUPLICATE_REQUEST: &str = "duplicate request id";

pub struct Broker {
    registry: AgentRegistry,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ResponseMessage>>>,
    default_timeout: Option<Duration>,
}

impl Broker {
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self {
            registry: AgentRegistry::new(),
            pending: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn new_shared(default_timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self::new(default_timeout))
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn register_agent(&self, agent: Arc<Agent>) -> Result<()> {
        self.registry.register_agent(agent)
    }

    pub fn unregister_agent(&self, name: &str) -> bool {
        self.registry.unregister_agent(name)
    }

    /// Insert or replace a handler; returns true when one was replaced.
    pub fn register_handler(
        &self,
        agent_name: &str,
        action: &str,
        handler: Arc<dyn Handler>,
    ) -> bool {
        self.registry.register_handler(agent_name, action, handler)
    }

    /// Route a message by type. Requests always produce a response (failures
    /// included); notifications and responses produce none.
    pub async fn send_message(&self, message: Message) -> Option<ResponseMessage> {
        match message {
            Message::Request(request) => Some(self.deliver_request(request).await),
            Message::Notification(notification) => {
                self.deliver_notification(notification).await;
                None
            }
            Message::Response(response) => {
                self.resolve(response);
                None
            }
        }
    }

    /// Send a request and wait for its response, bounded by `timeout`.
    ///
    /// Never fails and never waits past the timeout: every outcome, including
    /// unknown agents, handler errors and timeouts, comes back as a response
    /// whose `original_request_id` is the id of the request that was sent.
    pub async fn send_request(
        &self,
        from_agent: &str,
        to_agent: &str,
        action: &str,
        payload: Payload,
        timeout: Option<Duration>,
        priority: Priority,
    ) -> ResponseMessage {
        let request = RequestMessage::new(from_agent, to_agent, action, payload)
            .with_timeout(timeout)
            .with_priority(priority);
        self.request(request).await
    }

    /// Like `send_request` for an already built request.
    pub async fn request(&self, request: RequestMessage) -> ResponseMessage {
        let request_id = request.request_id();
        let from = request.envelope.from_agent.clone();
        let to = request.envelope.to_agent.clone();
        let action = request.envelope.action.clone();
        let timeout = request.timeout;

        let (slot, settled) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&request_id) {
                warn!(request_id = %request_id, "Request id already pending");
                metrics::record_broker_request("duplicate");
                return ResponseMessage::failure(&to, &from, &action, request_id, ERR_DUPLICATE_REQUEST);
            }
            pending.insert(request_id, slot);
        }

        let exchange = async {
            tokio::select! {
                biased;
                settled = settled => settled.map_err(|_| ERR_CANCELLED),
                response = self.deliver_request(request) => Ok(response),
            }
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ERR_TIMEOUT),
            },
            None => exchange.await,
        };

        // Whatever happened, the slot for this id is finished.
        self.pending.lock().remove(&request_id);

        match outcome {
            Ok(mut response) => {
                response.original_request_id = request_id;
                response
            }
            Err(reason) => {
                warn!(
                    request_id = %request_id,
                    from = %from,
                    to = %to,
                    action = %action,
                    reason,
                    "Request abandoned"
                );
                metrics::record_broker_request(if reason == ERR_TIMEOUT {
                    "timeout"
                } else {
                    "cancelled"
                });
                ResponseMessage::failure(&to, &from, &action, request_id, reason)
            }
        }
    }

    /// Fire-and-forget delivery. Handler failures are logged, never returned.
    pub async fn send_notification(
        &self,
        from_agent: &str,
        to_agent: &str,
        action: &str,
        payload: Payload,
        priority: Priority,
    ) {
        let notification =
            NotificationMessage::new(from_agent, to_agent, action, payload).with_priority(priority);
        self.deliver_notification(notification).await;
    }

    /// Abandon a pending request; its waiter receives a "request cancelled"
    /// failure and the in-flight handler is dropped.
    pub fn cancel_request(&self, request_id: Uuid) -> bool {
        let cancelled = self.pending.lock().remove(&request_id).is_some();
        if cancelled {
            debug!(request_id = %request_id, "Cancelled pending request");
        }
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Complete the pending slot for `response.original_request_id`. A
    /// response with no matching slot (late, duplicate or unsolicited) is
    /// dropped.
    fn resolve(&self, response: ResponseMessage) -> bool {
        let request_id = response.original_request_id;
        let slot = self.pending.lock().remove(&request_id);
        match slot {
            Some(slot) => slot.send(response).is_ok(),
            None => {
                debug!(request_id = %request_id, "Dropping response with no pending request");
                false
            }
        }
    }

    async fn deliver_request(&self, request: RequestMessage) -> ResponseMessage {
        let request_id = request.request_id();
        let from = request.envelope.from_agent.clone();
        let to = request.envelope.to_agent.clone();
        let action = request.envelope.action.clone();

        if !self.registry.contains(&to) {
            error!(to = %to, action = %action, "Agent not found");
            metrics::record_broker_request("agent_not_found");
            return ResponseMessage::failure(
                &to,
                &from,
                &action,
                request_id,
                format!("{ERR_AGENT_NOT_FOUND}: {to}"),
            );
        }

        let Some(handler) = self.registry.handler(&to, &action) else {
            error!(to = %to, action = %action, "No handler found");
            metrics::record_broker_request("no_handler");
            return ResponseMessage::failure(
                &to,
                &from,
                &action,
                request_id,
                format!("{ERR_NO_HANDLER}: {action}"),
            );
        };

        let invocation = AssertUnwindSafe(handler.handle(Message::Request(request)));
        match invocation.catch_unwind().await {
            Ok(Ok(mut response)) => {
                response.original_request_id = request_id;
                metrics::record_broker_request("ok");
                response
            }
            Ok(Err(err)) => {
                error!(to = %to, action = %action, error = %err, "Handler error");
                metrics::record_broker_request("handler_error");
                ResponseMessage::failure(&to, &from, &action, request_id, err.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(to = %to, action = %action, error = %reason, "Handler panicked");
                metrics::record_broker_request("handler_error");
                ResponseMessage::failure(&to, &from, &action, request_id, reason)
            }
        }
    }

    async fn deliver_notification(&self, notification: NotificationMessage) {
        let to = notification.envelope.to_agent.clone();
        let action = notification.envelope.action.clone();

        if !self.registry.contains(&to) {
            debug!(to = %to, action = %action, "Dropping notification for unknown agent");
            return;
        }
        let Some(handler) = self.registry.handler(&to, &action) else {
            debug!(to = %to, action = %action, "Dropping notification with no handler");
            return;
        };

        let invocation = AssertUnwindSafe(handler.handle(Message::Notification(notification)));
        match invocation.catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                error!(to = %to, action = %action, error = %err, "Notification handler error")
            }
            Err(panic) => error!(
                to = %to,
                action = %action,
                error = %panic_message(panic.as_ref()),
                "Notification handler panicked"
            ),
        }
    }
}
