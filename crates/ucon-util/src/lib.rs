//! Shared utilities for the ucon engine
//!
//! This crate provides:
//! - ID types (SessionId, ConditionId, ObligationId)
//! - The error taxonomy shared by every ucon crate

mod error;
mod ids;

pub use error::*;
pub use ids::*;
