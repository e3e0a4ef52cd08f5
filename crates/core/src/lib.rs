//! `sitegate-core`: shared domain primitives for the permission engine.
//!
//! This crate contains **pure domain** building blocks (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{ProjectId, UserId};
pub use version::ExpectedVersion;
