//! Medcast podcast generation.
//!
//! - `sources` - request materials and their limits
//! - `client` - the multipart call to the generation backend
//! - `runner` - the background task that ties a job to one generation

pub mod client;
pub mod runner;
pub mod sources;

pub use client::{MedcastClient, MedcastError};
pub use runner::JobRunner;
pub use sources::{MedcastSources, ValidationError};
