//! Alleycat compiler driver CLI
//!
//! Argument parsing, configuration layering and error reporting for the
//! `alleycatcc` binary. The pipeline itself lives in `alleycat-pipeline`.

pub mod cli;
pub mod commands;
pub mod diagnostics;

pub use alleycat_pipeline as pipeline;

pub mod error {
    use alleycat_pipeline::PipelineError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum CliError {
        #[error(transparent)]
        Pipeline(#[from] PipelineError),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Invalid input: {0}")]
        InvalidInput(String),
    }

    pub type Result<T> = std::result::Result<T, CliError>;
}

pub use error::{CliError, Result};
