//! Job contract and job-type registry for iron-cadence.
//!
//! This crate provides:
//!
//! - **Job contract**: the [`Job`] trait implemented by every job type
//! - **Descriptor model**: durable [`JobDescriptor`] + [`JobParameter`] data
//! - **Registry**: explicit job-type-name → factory table built at startup

pub mod descriptor;
pub mod job;
pub mod registry;

pub use descriptor::{JobDescriptor, JobParameter, JobParameterMap, ParameterValue};
pub use job::{Job, JobFailure};
pub use registry::{JobFactory, JobRegistry, UnknownJobType};
