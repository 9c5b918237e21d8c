//! Command implementations: reset, resequence.

pub mod resequence;
pub mod reset;
