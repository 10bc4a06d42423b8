//! Client side of the remote workflow service.
//!
//! `ApiClient` owns the HTTP plumbing; each stage of a run adds its methods to
//! it from its own module.
pub mod artifact;
pub mod binder;
pub mod client;
pub mod job;
pub mod overrides;
pub mod resource;
pub mod template;

pub use binder::{bind, BindOptions, BoundField};
pub use client::ApiClient;
pub use job::{JobRequest, JobStatus, RequestId};
pub use overrides::FieldOverride;
pub use template::{FieldDeclaration, Template};
