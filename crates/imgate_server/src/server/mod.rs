#![forbid(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod gateway;
pub mod group_store;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod session;
