//! # CLI Subcommands
//!
//! Contains modules that run the subcommands.

pub mod mkpack;
pub mod inspect;
pub mod run;
pub mod script;
pub mod completions;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("One of the parameters was out of range")]
    OutOfRange,
    #[error("Input source is not supported")]
    UnsupportedFormat,
    #[error("Script failed at line {0}")]
    ScriptFailed(usize),
    #[error("File not found")]
    FileNotFound
}
