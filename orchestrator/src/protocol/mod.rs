// Agent-to-agent messaging substrate: message model, registry and broker.

pub mod broker;
pub mod message;
pub mod registry;

pub use broker::Broker;
pub use message::{
    Envelope, Message, MessageType, NotificationMessage, Payload, Priority, RequestMessage,
    ResponseMessage,
};
pub use registry::{handler_fn, AgentRegistry, Handler};
