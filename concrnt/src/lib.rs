//! Concrnt - federated timeline server
//!
//! Independent domains host user entities and exchange signed,
//! content-addressed documents. The crate is organized around three
//! subsystems:
//!
//! - **Commit pipeline**: identity middleware (`auth`), signature and key
//!   graph verification (`crypto`, `key`), and the type-routed dispatcher
//!   (`store`) feeding the per-resource services.
//! - **Timeline engine**: epoch-chunked storage and cache (`timeline`,
//!   `chunk-cache-core`) serving time-windowed reads locally and across
//!   domains.
//! - **Realtime fan-out**: the event hub (`pubsub`), the client socket
//!   (`server::websocket`) and the peer connector (`agent`).

pub mod ack;
pub mod agent;
pub mod association;
pub mod auth;
pub mod cdid;
pub mod client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod document;
pub mod domain;
pub mod entity;
pub mod jwt;
pub mod key;
pub mod message;
pub mod model;
pub mod policy;
pub mod profile;
pub mod pubsub;
pub mod routes;
pub mod schema;
pub mod semanticid;
pub mod server;
pub mod store;
pub mod subscription;
pub mod timeline;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ConcrntError, Result};
