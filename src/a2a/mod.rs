//! Agent-to-Agent Protocol (C10): a typed message envelope, per-agent
//! inboxes, and correlation-id-keyed request/response pairing. Every
//! EXECUTE is routed through the Action Router (C7), so agents never
//! reach a target system directly except under the `scrappy` preset.

mod message;
mod protocol;

pub use message::{A2AMessage, A2AMessageType, PROTOCOL_VERSION};
pub use protocol::A2AProtocol;
