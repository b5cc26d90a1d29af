//! Server module - hosts the store, notifier and gateway behind a Unix socket

mod listener;

pub use listener::ServerListener;
