//! vr-core: shared errors, identifiers, configuration and background tasks.
//!
//! This crate is the foundational dependency for all other vr-* crates,
//! providing the unified error type with its HTTP mapping, the JSON
//! configuration model, and the [`tasks::TaskStore`] used to observe
//! detached background work.

pub mod config;
pub mod error;
pub mod ids;
pub mod tasks;

pub use error::{Error, Result};
pub use ids::*;
