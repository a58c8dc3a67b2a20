//! Core types, traits, and error definitions for IntentFlow.
//!
//! This crate provides the foundational building blocks shared across all layers
//! of the orchestration pipeline: the intent model, the record types every
//! component writes to history, the traits at each injection seam, and the
//! layered application config.

pub mod call;
pub mod config;
pub mod context;
pub mod error;
pub mod json;
pub mod mocks;
pub mod traits;
pub mod types;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
