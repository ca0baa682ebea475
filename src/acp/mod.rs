//! Agent-client protocol (ACP): line framing, JSON-RPC envelope, and the
//! role-agnostic connection multiplexer.
//!
//! The same [`connection::RpcConnection`] drives both sides of the protocol:
//! the session driver uses it as a client against an agent peer, and
//! in-process adapters use it as a server toward the driver over a pair of
//! duplex pipes. The peer is always a byte stream carrying one JSON message
//! per line.

pub mod codec;
pub mod connection;
pub mod protocol;

/// Protocol version negotiated during `initialize`.
pub const PROTOCOL_VERSION: u16 = 1;

/// Separator used when a system prompt is folded into the first user prompt
/// for peers that do not consume session meta.
pub const SYSTEM_PROMPT_SEPARATOR: &str = "\n\n---\n\n";
