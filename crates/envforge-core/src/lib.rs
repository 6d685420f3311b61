//! Envforge core — the substrate every agent and the orchestrator stand on.
//!
//! Contains the message bus and per-agent mailboxes, the role-scoped
//! workspace, the child-process supervisor, the progress event emitter,
//! port allocation, and the shared generation context.

pub mod bus;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod events;
pub mod ports;
pub mod process;
pub mod types;
pub mod workspace;
