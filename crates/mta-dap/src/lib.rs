//! Debug Adapter Protocol bridge for the MTA:SA Lua debugger.
//!
//! The editor talks DAP to this adapter over stdio. The game server side only exposes a
//! poll-based HTTP API, so the adapter keeps per-context state, turns editor commands into
//! backend calls and polls the backend to raise `stopped` events.

pub mod breakpoints;
pub mod context;
pub mod dap;
pub mod error;
pub mod handles;
pub mod hardening;
pub mod paths;
pub mod poller;
pub mod schedule;
pub mod server;
pub mod session;

pub use crate::error::{AdapterError, AdapterResult};
pub use crate::session::{Flow, Session};
