//! Command implementations

pub mod completions;
pub mod config;
pub mod entity;
pub mod service;
pub mod session;
pub mod watch;
