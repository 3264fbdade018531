//! Command implementations for the Alleycat CLI

pub mod compile;

pub use compile::compile_command;
