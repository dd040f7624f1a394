//! # Chat Gateway Library
//!
//! Real-time group-chat gateway:
//! - WebSocket gateway with per-address admission control
//! - Token-bound connections and room-scoped broadcast
//! - Message send/edit/delete pipeline over PostgreSQL
//! - Redis for sessions, presence, message-page caching, and the
//!   optional multi-instance broadcast relay
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Core entities and repository traits
//! - **Application Layer**: Session, room, and message services
//! - **Infrastructure Layer**: Database, cache, and metrics implementations
//! - **Presentation Layer**: HTTP routes and the WebSocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! chat_gateway/
//! +-- config/         Configuration management
//! +-- domain/         Domain entities and repository traits
//! +-- application/    Session, room, and message services
//! +-- infrastructure/ Database, cache, and metrics implementations
//! +-- presentation/   HTTP routes and WebSocket gateway
//! +-- shared/         Common utilities (errors, snowflake IDs)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Gateway services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
