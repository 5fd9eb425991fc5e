//! Session bootstrap for Tavern.
//!
//! [`Bootstrap`] sequences the backend calls a session needs before the
//! first scene can be shown: identity first, then two concurrent fan-outs
//! separated by the choice of the active entity. Every call goes through the
//! retry executor from `tavern-net`; the predicates in [`payload`] decide
//! whether a response is usable.

mod bootstrap;
pub mod payload;
mod selection;
mod teardown;

pub use bootstrap::{BootError, BootEvent, BootOutcome, BootPolicies, BootState, Bootstrap};
pub use selection::{SelectionError, resolve_selection};
pub use teardown::Teardown;
