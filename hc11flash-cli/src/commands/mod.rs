//! Command implementations.
//!
//! Each group of subcommands is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod info;
