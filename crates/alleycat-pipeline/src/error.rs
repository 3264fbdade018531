use crate::stage::{PipelineKind, Stage};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the top-level handler when reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Conflicting or missing configuration, found while planning.
    Configuration,
    /// Invalid action arguments or inputs, found while assembling.
    Construction,
    /// An external tool failed or could not be launched.
    Execution,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No input files")]
    NoInputFiles,

    #[error("Can't produce {pipeline} output without {pipeline} input files")]
    OutputWithoutInput { pipeline: PipelineKind },

    #[error("No output file for {pipeline} pipeline specified")]
    MissingOutput { pipeline: PipelineKind },

    #[error("Analysis/transformation passes require a database file")]
    DatabaseRequired,

    #[error("Multiple input files for {pipeline} pipeline not valid without linking stage")]
    MultipleInputsWithoutLink { pipeline: PipelineKind },

    #[error("Can't emit intermediate form after linking")]
    IntermediateAfterLink,

    #[error("Invalid action arguments for '{kind}': expected {expected}, got {found} unit(s)")]
    InvalidActionArguments {
        kind: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("Action '{kind}' requires {what}, which is not configured")]
    MissingConfig {
        kind: &'static str,
        what: &'static str,
    },

    #[error("Unknown file format of '{}' at {stage} stage of {pipeline} pipeline", path.display())]
    UnrecognizedInputFormat {
        path: PathBuf,
        pipeline: PipelineKind,
        stage: Stage,
    },

    #[error("No output file assigned for unit '{unit}'")]
    NoOutputAssigned { unit: String },

    #[error("No input file assigned for unit '{unit}'")]
    NoInputAssigned { unit: String },

    #[error("{stage} stage must be the last active stage when enabled")]
    StageOrdering { stage: Stage },

    #[error("Subcommand failed: {command}")]
    SubcommandFailed { kind: &'static str, command: String },

    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to allocate temporary artifact: {0}")]
    TempArtifact(#[source] io::Error),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::NoInputFiles
            | PipelineError::OutputWithoutInput { .. }
            | PipelineError::MissingOutput { .. }
            | PipelineError::DatabaseRequired
            | PipelineError::MultipleInputsWithoutLink { .. }
            | PipelineError::IntermediateAfterLink => ErrorCategory::Configuration,
            PipelineError::InvalidActionArguments { .. }
            | PipelineError::MissingConfig { .. }
            | PipelineError::UnrecognizedInputFormat { .. }
            | PipelineError::NoOutputAssigned { .. }
            | PipelineError::NoInputAssigned { .. }
            | PipelineError::StageOrdering { .. }
            | PipelineError::TempArtifact(_) => ErrorCategory::Construction,
            PipelineError::SubcommandFailed { .. } | PipelineError::Spawn { .. } => {
                ErrorCategory::Execution
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
