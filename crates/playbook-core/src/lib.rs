#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate hiro_system_kit;

pub extern crate alloy;
pub extern crate error_stack;

pub mod client;
pub mod codec;
pub mod context;
pub mod errors;
pub mod eval;
pub mod executor;
pub mod manifest;
pub mod spec;
pub mod types;

#[cfg(test)]
mod tests;

pub use context::Context;
pub use errors::{PlaybookError, PlaybookResult};
