//! Pluggable per-language build handlers and their dispatch registry.
//! See `SPEC_FULL.md` §4.G.

pub mod action;
pub mod error;
pub mod generic_exec;
pub mod handler;
pub mod registry;

pub use action::{Action, ActionResult};
pub use error::HandlerError;
pub use generic_exec::GenericExecHandler;
pub use handler::{Handler, Workspace};
pub use registry::HandlerRegistry;
