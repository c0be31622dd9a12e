//! Usage-control enforcement engine
//!
//! This crate is the heart of ucon, containing:
//! - Condition and obligation registries with name-based dispatch
//! - The external policy decision point interface (and test doubles)
//! - Continuous monitoring (Idle -> Monitoring -> Stopped), one task per session
//! - The enforcer that sequences conditions, pre obligations, the policy
//!   decision and monitoring around each session

mod conditions;
mod enforcer;
mod events;
mod mock;
mod monitor;
mod obligations;
mod policy;

pub use conditions::*;
pub use enforcer::*;
pub use events::*;
pub use mock::*;
pub use monitor::{Monitor, MonitorState};
pub use obligations::*;
pub use policy::*;
