//! Client-side car price tracking: a per-user tracking store, an in-process
//! price source, and per-session refresh coordination.

pub mod auth;
pub mod config;
pub mod error;
pub mod lifetime;
pub mod refresh;
pub mod report;
pub mod source;
pub mod state;
pub mod types;
