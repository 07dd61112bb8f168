//! Distributed load generation.
//!
//! A cluster is a fixed list of drivers and any number of agents. The
//! drivers elect a master that splits each phase of a submitted execution
//! plan across the registered agents, tracks their progress through
//! heartbeats and redistributes the remaining work when agents join or
//! leave. The `loadmesh` binary wraps this library; the library APIs may
//! evolve with it.
pub mod args;
pub mod config;
pub mod distributed;
pub mod entry;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod phase;
pub mod runmode;
pub mod runner;
pub mod shutdown;
pub mod shutdown_handlers;
