//! # Domain Layer
//!
//! Core entities and repository traits. No dependencies on infrastructure
//! or presentation; repository traits define the data-access contracts
//! implemented in the infrastructure layer.

pub mod entities;

pub use entities::*;
