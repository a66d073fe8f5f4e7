//! HTTP transport: axum routes and server.

mod routes;
mod server;

pub use routes::routes;
pub use server::{ServerConfig, serve};
