//! planning-poker - real-time planning poker sessions with optimistic sync
//!
//! This crate provides the core functionality for planning-poker, including:
//! - The session data model and the storage and change-feed contracts
//! - The mutation gateway enforcing host-only actions
//! - The per-client reconciliation engine and session connection
//! - Client-server protocol and configuration management
//!
//! # Architecture
//!
//! planning-poker uses a client-server model where:
//! - The server (`poker-server`) owns the store and change notifier
//! - The client (`poker`) keeps a reconciled view of one session
//! - Communication happens over Unix domain sockets

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod protocol;
pub mod server;
pub mod store;
pub mod sync;

pub use error::{PokerError, Result};
