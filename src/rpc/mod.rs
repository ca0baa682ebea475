//! Worker RPC surface.
//!
//! The wire framing is deliberately thin: JSON bodies over a small set of
//! routes mapping one-to-one onto [`crate::worker::manager::SessionManager`]
//! operations. The dispatcher itself talks to workers through the
//! [`crate::dispatch::WorkerClient`] trait, not through this surface.

pub mod http;
