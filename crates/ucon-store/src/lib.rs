//! Session and audit storage for the ucon engine
//!
//! Provides:
//! - The `Session` entity and its synchronized lifecycle
//! - `SessionStore`, the in-memory session registry
//! - Audit log (append-only) with an in-memory implementation

mod audit;
mod memory;
mod session;
mod store;
mod traits;

pub use audit::*;
pub use memory::*;
pub use session::*;
pub use store::*;
pub use traits::*;
