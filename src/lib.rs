//! chat-relay — moderation and distribution engine for a shared chat relay.

pub mod bus;
pub mod config;
pub mod distribution;
pub mod error;
pub mod model;
pub mod mutes;
pub mod names;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod routes;
pub mod store;
