//! Infrastructure Layer
//!
//! Implementations for external services:
//! - Database repositories (PostgreSQL)
//! - Cache and presence storage (Redis)
//! - Prometheus metrics

pub mod cache;
pub mod database;
pub mod metrics;
pub mod repositories;
