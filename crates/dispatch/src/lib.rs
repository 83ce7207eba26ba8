//! Tiffin dispatch service library.
//!
//! Orders come in from users, shops confirm them, and the dispatch engine
//! finds a captain for each resulting ride. The binary in `main.rs` wires
//! this library to a `PostgreSQL` or in-memory store and serves it over HTTP
//! and WebSocket.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
