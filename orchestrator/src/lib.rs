//! Agent orchestration for trip planning: a request/response broker between
//! named agents, an intent router, and a fixed-order planning pipeline with a
//! model-written final plan.

pub mod agents;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod protocol;
pub mod redis_client;
pub mod store;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
