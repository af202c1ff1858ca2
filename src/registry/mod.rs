//! Package registry access and post-release validation.

pub mod client;
pub mod validator;

pub use client::Npm;
pub use validator::{
    resolve_targets, validate_registry, Expectation, NpmObservation, NpmTarget,
};
