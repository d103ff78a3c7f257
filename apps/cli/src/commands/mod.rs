//! Command implementations for the Vocalis CLI.

pub mod train;
