//! CLI command modules.

pub mod nodes;
pub mod simulate;
pub mod transfer;
