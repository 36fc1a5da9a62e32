//! Hook Relay: turns webhook and mailbox events into scheduled agent jobs.

pub mod channels;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod webhook;
