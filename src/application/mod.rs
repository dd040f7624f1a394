//! Application Layer
//!
//! Use-case services sitting between the WebSocket presentation layer
//! and the domain/infrastructure layers.

pub mod services;

pub use services::*;
