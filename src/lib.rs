//! Route-trace task relay.
//!
//! Accepts trace requests over two transports: an MQTT publish/subscribe
//! relay ([`session`]) and a plain HTTP endpoint ([`web`]). Both paths end
//! up in the [`trace`] command runner; only the MQTT path goes through the
//! [`relay`] dispatch engine.

pub mod codec;
pub mod config;
pub mod dns;
pub mod error;
pub mod relay;
pub mod session;
pub mod trace;
pub mod web;
