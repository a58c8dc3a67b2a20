//! Core type definitions for IntentFlow.
//!
//! Broken down by the pipeline stage that produces each type.

pub mod checkpoint;
pub mod complexity;
pub mod correction;
pub mod history;
pub mod intent;
pub mod kind;
pub mod pipeline;
pub mod plan;
pub mod records;

pub use checkpoint::*;
pub use complexity::*;
pub use correction::*;
pub use history::*;
pub use intent::*;
pub use kind::*;
pub use pipeline::*;
pub use plan::*;
pub use records::*;
