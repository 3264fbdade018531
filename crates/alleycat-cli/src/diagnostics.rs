//! Diagnostic and error reporting utilities

use crate::{CliError, Result};
use alleycat_pipeline::ErrorCategory;
use miette::Diagnostic;
use thiserror::Error;

/// Install miette as the global report handler.
pub fn setup_error_reporting() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(false)
                .unicode(true)
                .build(),
        )
    }))
    .map_err(|e| CliError::Config(format!("Failed to setup error reporting: {}", e)))?;

    Ok(())
}

#[derive(Error, Debug, Diagnostic)]
pub enum DriverDiagnostic {
    #[error("{message}")]
    #[diagnostic(
        code(alleycat::configuration),
        help("Check the input/output files and stage flags; run with --help for usage")
    )]
    Configuration { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(alleycat::construction),
        help("Inputs must be .cl, .cc, .cpp, .ll or .bc files appropriate for their pipeline")
    )]
    Construction { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(alleycat::execution),
        help("Re-run with -v to see each stage, or --dry-run to print the commands")
    )]
    Execution { message: String },

    #[error("{message}")]
    #[diagnostic(code(alleycat::input), help("Check that every input file exists"))]
    Input { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(alleycat::config_file),
        help("Check alleycat.toml for correct syntax and values")
    )]
    ConfigFile { message: String },
}

impl DriverDiagnostic {
    /// Map a CLI error to its diagnostic. IO errors have none.
    pub fn from_cli_error(error: &CliError) -> Option<Self> {
        let message = error.to_string();
        let diagnostic = match error {
            CliError::Pipeline(err) => match err.category() {
                ErrorCategory::Configuration => DriverDiagnostic::Configuration { message },
                ErrorCategory::Construction => DriverDiagnostic::Construction { message },
                ErrorCategory::Execution => DriverDiagnostic::Execution { message },
            },
            CliError::InvalidInput(_) => DriverDiagnostic::Input { message },
            CliError::Config(_) => DriverDiagnostic::ConfigFile { message },
            CliError::Io(_) => return None,
        };
        Some(diagnostic)
    }
}

/// Print `error` as a diagnostic on stderr. Returns false when the error
/// has no diagnostic form and must be reported another way.
pub fn render_cli_error(error: &CliError) -> bool {
    match DriverDiagnostic::from_cli_error(error) {
        Some(diagnostic) => {
            eprintln!("{:?}", miette::Report::new(diagnostic));
            true
        }
        None => false,
    }
}
