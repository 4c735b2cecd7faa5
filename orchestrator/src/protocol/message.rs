// Message model shared by the broker and the agents.
//
// Every message carries an `Envelope`; the variant decides the message type,
// so the type tag can never drift from the shape of the message.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Ordered string-keyed payload carried by every message.
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
        }
    }
}

/// Advisory priority. The broker forwards it but never reorders by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Priority::High),
            "normal" => Some(Priority::Normal),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Fields common to every message variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from_agent: String,
    pub to_agent: String,
    pub action: String,
    pub payload: Payload,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub metadata: Payload,
}

impl Envelope {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        action: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            action: action.into(),
            payload,
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            priority: Priority::Normal,
            metadata: Payload::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub envelope: Envelope,
    /// Abandon the request once this much time has passed without a response.
    pub timeout: Option<Duration>,
}

impl RequestMessage {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        action: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            envelope: Envelope::new(from_agent, to_agent, action, payload),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.envelope.priority = priority;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.envelope.request_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub envelope: Envelope,
    pub success: bool,
    /// Only populated when `success` is false.
    pub error: Option<String>,
    pub original_request_id: Uuid,
}

impl ResponseMessage {
    /// Successful reply addressed back to the sender of `request`.
    pub fn reply_to(request: &Envelope, payload: Payload) -> Self {
        let mut envelope = Envelope::new(
            request.to_agent.clone(),
            request.from_agent.clone(),
            request.action.clone(),
            payload,
        );
        envelope.priority = request.priority;
        Self {
            envelope,
            success: true,
            error: None,
            original_request_id: request.request_id,
        }
    }

    /// Failed reply addressed back to the sender of `request`.
    pub fn failure_to(request: &Envelope, error: impl Into<String>) -> Self {
        let mut response = Self::reply_to(request, Payload::new());
        response.success = false;
        response.error = Some(error.into());
        response
    }

    /// Failure built without the original request at hand; used by the broker
    /// once the request itself has been handed to a handler.
    pub fn failure(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        action: impl Into<String>,
        original_request_id: Uuid,
        error: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(from_agent, to_agent, action, Payload::new()),
            success: false,
            error: Some(error.into()),
            original_request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub envelope: Envelope,
}

impl NotificationMessage {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        action: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            envelope: Envelope::new(from_agent, to_agent, action, payload),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.envelope.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
    Notification(NotificationMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
            Message::Notification(_) => MessageType::Notification,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        match self {
            Message::Request(m) => &m.envelope,
            Message::Response(m) => &m.envelope,
            Message::Notification(m) => &m.envelope,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        match self {
            Message::Request(m) => m.envelope,
            Message::Response(m) => m.envelope,
            Message::Notification(m) => m.envelope,
        }
    }

    /// Dictionary form: `from`, `to`, `type`, `action`, `payload` and a
    /// `metadata` object holding `request_id`, `timestamp`, `priority` and any
    /// extra metadata keys. Variant-specific fields sit at the top level.
    pub fn to_value(&self) -> Value {
        let envelope = self.envelope();
        let mut metadata = envelope.metadata.clone();
        metadata.insert("request_id".into(), json!(envelope.request_id));
        metadata.insert("timestamp".into(), json!(envelope.timestamp.to_rfc3339()));
        metadata.insert("priority".into(), json!(envelope.priority.as_str()));

        let mut value = json!({
            "from": envelope.from_agent,
            "to": envelope.to_agent,
            "type": self.message_type().as_str(),
            "action": envelope.action,
            "payload": envelope.payload,
            "metadata": metadata,
        });

        if let Some(object) = value.as_object_mut() {
            match self {
                Message::Request(request) => {
                    if let Some(timeout) = request.timeout {
                        object.insert("timeout".into(), json!(timeout.as_secs_f64()));
                    }
                }
                Message::Response(response) => {
                    object.insert("success".into(), json!(response.success));
                    object.insert("error".into(), json!(response.error));
                    object.insert(
                        "original_request_id".into(),
                        json!(response.original_request_id),
                    );
                }
                Message::Notification(_) => {}
            }
        }

        value
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| OrchestratorError::InvalidMessage("message is not an object".into()))?;

        let text = |key: &str| -> Result<String> {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| OrchestratorError::InvalidMessage(format!("missing field `{key}`")))
        };

        let message_type: MessageType = serde_json::from_value(json!(text("type")?))
            .map_err(|_| OrchestratorError::InvalidMessage("unknown message type".into()))?;

        let mut metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let request_id = metadata
            .remove("request_id")
            .and_then(|id| id.as_str().and_then(|s| Uuid::parse_str(s).ok()))
            .unwrap_or_else(Uuid::new_v4);
        let timestamp = metadata
            .remove("timestamp")
            .and_then(|ts| {
                ts.as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
            })
            .unwrap_or_else(Utc::now);
        let priority = metadata
            .remove("priority")
            .and_then(|p| p.as_str().and_then(Priority::parse))
            .unwrap_or_default();

        let agent = |key: &str| -> Result<String> {
            let name = text(key)?;
            if name.trim().is_empty() {
                return Err(OrchestratorError::InvalidMessage(format!("empty field `{key}`")));
            }
            Ok(name)
        };

        let envelope = Envelope {
            from_agent: agent("from")?,
            to_agent: agent("to")?,
            action: text("action")?,
            payload: object
                .get("payload")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            request_id,
            timestamp,
            priority,
            metadata,
        };

        Ok(match message_type {
            MessageType::Request => Message::Request(RequestMessage {
                envelope,
                timeout: object
                    .get("timeout")
                    .and_then(Value::as_f64)
                    .map(|secs| {
                        Duration::try_from_secs_f64(secs).map_err(|e| {
                            OrchestratorError::InvalidMessage(format!("invalid timeout {secs}: {e}"))
                        })
                    })
                    .transpose()?,
            }),
            MessageType::Response => {
                let success = object.get("success").and_then(Value::as_bool).unwrap_or(true);
                let original_request_id = object
                    .get("original_request_id")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        OrchestratorError::InvalidMessage(
                            "response without `original_request_id`".into(),
                        )
                    })?;
                Message::Response(ResponseMessage {
                    envelope,
                    success,
                    error: if success {
                        None
                    } else {
                        object.get("error").and_then(Value::as_str).map(str::to_string)
                    },
                    original_request_id,
                })
            }
            MessageType::Notification => Message::Notification(NotificationMessage { envelope }),
        })
    }
}

impl From<RequestMessage> for Message {
    fn from(message: RequestMessage) -> Self {
        Message::Request(message)
    }
}

impl From<ResponseMessage> for Message {
    fn from(message: ResponseMessage) -> Self {
        Message::Response(message)
    }
}

impl From<NotificationMessage> for Message {
    fn from(message: NotificationMessage) -> Self {
        Message::Notification(message)
    }
}
