//! HTTP server, router and WebSocket upgrade handling

mod http;
pub mod websocket;

pub use http::{run, AppState};
