//! Agent Health backend
//!
//! Runs evaluation experiments against AI agents, streams progress to clients
//! over server-sent events, and enriches reports with trace-derived metrics
//! once the agent's spans reach the trace store.

pub mod api;
pub mod app_state;
pub mod catalog;
pub mod config;
pub mod evaluation;
pub mod executor;
pub mod observability;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod storage;
