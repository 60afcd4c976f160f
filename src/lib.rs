//! Order placement across independently owned services: token verification,
//! a batched stock check, an atomic order ledger, and at-least-once
//! propagation of `OrderCreated` events to downstream consumers.

pub mod auth;
pub mod config;
pub mod domain;
pub mod inventory;
pub mod ledger;
pub mod messaging;
pub mod metrics;
pub mod notification;
pub mod orchestrator;
pub mod utils;
