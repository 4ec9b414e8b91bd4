//! # Irrigo Gateway
//! HTTP + WebSocket surface for the irrigation dashboard.

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{AppState, build_router, serve};
