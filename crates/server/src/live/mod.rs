// crates/server/src/live/mod.rs
//! Realtime fan-out of job log lines to live subscribers.

pub mod hub;
pub mod listener;

pub use hub::{DeliveryReport, FanoutHub, LogSubscription};
pub use listener::FanoutListener;
