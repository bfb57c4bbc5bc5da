//! # Arena Session Server
//!
//! Session and messaging core for a real-time multiplayer game backend. The
//! server accepts TCP connections, authenticates them into player sessions,
//! decodes the compact binary request protocol from the `shared` crate, and
//! propagates state changes between players through per-session update
//! queues that clients poll with heartbeats.
//!
//! ## Architecture
//!
//! ### Task per Connection
//! The acceptor runs one loop and spawns one tokio task per socket. A session
//! task processes its own requests strictly in arrival order and only ever
//! waits on its own socket or on short registry locks.
//!
//! ### Pull-Based Synchronization
//! Handlers never write to another player's socket. Updates meant for other
//! players are queued on their sessions and delivered when those clients send
//! their next heartbeat, so each socket has exactly one writer.
//!
//! ### Failure Containment
//! - A bad request (unknown opcode, not logged in) drops only that frame
//! - A corrupt or closed stream ends only that session
//! - A listener failure ends the server; the supervisor rebuilds it after a delay
//!
//! ## Module Organization
//!
//! - `config`: server settings from TOML and the command line
//! - `dispatch`: opcode to request-parser table
//! - `handlers`: what each request does
//! - `session`: per-connection state, update queue and read loop
//! - `registry`: live sessions, logged-in players and the side-channel port pool
//! - `network`: acceptor and supervisor
//! - `store`: user lookup and creation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::store::MemoryUserStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::bind(&config, Arc::new(MemoryUserStore::new())).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod network;
pub mod registry;
pub mod session;
pub mod store;
