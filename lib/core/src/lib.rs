//! Core domain types and utilities for the iron-cadence platform.
//!
//! This crate provides the foundational types, error handling, and the
//! ambient tenant session used throughout the iron-cadence job scheduler.

pub mod error;
pub mod id;
pub mod session;

pub use error::Result;
pub use id::{JobDescriptorId, ParseIdError, TenantId};
pub use session::Session;
