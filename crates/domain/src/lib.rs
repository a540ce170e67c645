//! FastBreak domain model
//!
//! Jobs, channels, delivery records, configuration and the top-level
//! [`FastBreakError`]. Pure data: no I/O and no dependency on the other
//! workspace crates.

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
