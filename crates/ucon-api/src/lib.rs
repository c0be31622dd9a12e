//! Shared types for the ucon engine
//!
//! Definitions of conditions and obligations, attribute values and the
//! serializable session snapshot handed to callers.

mod types;

pub use types::*;
