//! services/api/src/lib.rs
//!
//! Library half of the quickpad API service: storage adapters, the realtime
//! synchronization core and the web layer. The `api` binary wires them together.

pub mod adapters;
pub mod config;
pub mod error;
pub mod sync;
pub mod web;
