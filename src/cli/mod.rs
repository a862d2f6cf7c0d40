//! CLI module for the tap-config binary

pub mod commands;
pub mod error;
pub mod output;

pub use error::CliError;
