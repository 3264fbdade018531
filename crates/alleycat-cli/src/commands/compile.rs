//! Compilation command implementation

use crate::{cli::CliConfig, CliError, Result};
use alleycat_pipeline::{Driver, DriverConfig, PipelineKind, RunSummary};
use clap::Args;
use console::style;
use std::path::PathBuf;
use tracing::info;

/// Driver options
#[derive(Debug, Clone, Default, Args)]
pub struct CompileArgs {
    /// Input files for the BSP pipeline (.cl, .ll, .bc)
    #[arg(long = "bsp-in", value_name = "FILE", num_args = 1..)]
    pub bsp_in: Vec<PathBuf>,

    /// Input files for the host pipeline (.cc, .cpp, .ll, .bc)
    #[arg(long = "host-in", value_name = "FILE", num_args = 1..)]
    pub host_in: Vec<PathBuf>,

    /// BSP code output filename
    #[arg(long = "bsp-out", value_name = "FILE")]
    pub bsp_out: Option<PathBuf>,

    /// Host code output filename
    #[arg(long = "host-out", value_name = "FILE")]
    pub host_out: Option<PathBuf>,

    /// Only run the compile stage (same as -c --no-analyze --no-transform)
    #[arg(short = 'S')]
    pub only_compile: bool,

    /// Only run the compile, analyze and transform stages
    #[arg(short = 'c')]
    pub compile_analyze_transform_only: bool,

    /// Emit LLVM IR text instead of bitcode; not possible after linking
    #[arg(long = "emit-llvm")]
    pub emit_llvm: bool,

    /// Disable static code analysis
    #[arg(long = "no-analyze", alias = "fno-analyze")]
    pub no_analyze: bool,

    /// Disable code transformations
    #[arg(long = "no-transform", alias = "fno-transform")]
    pub no_transform: bool,

    /// Enable the assemble and disassemble stages
    #[arg(long = "backend-stages")]
    pub backend_stages: bool,

    /// Print commands, but do not run them
    #[arg(long = "dry-run", alias = "###")]
    pub dry_run: bool,

    /// Analysis database filename
    #[arg(long = "db", value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Add a BSP include path
    #[arg(long = "bsp-include", value_name = "PATH")]
    pub bsp_include: Vec<PathBuf>,

    /// Add a BSP library path
    #[arg(long = "bsp-lib-dir", value_name = "PATH")]
    pub bsp_lib_dir: Vec<PathBuf>,

    /// Add a host include path
    #[arg(long = "host-include", value_name = "PATH")]
    pub host_include: Vec<PathBuf>,

    /// Add a host library path
    #[arg(long = "host-lib-dir", value_name = "PATH")]
    pub host_lib_dir: Vec<PathBuf>,

    /// Link a host library (e.g. `-l cuda` links libcuda.so)
    #[arg(short = 'l', value_name = "NAME")]
    pub libraries: Vec<String>,

    /// Directory for temporary files
    #[arg(long = "temp-dir", value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,
}

impl CompileArgs {
    /// Command-line layer: overrides whatever the file and environment set.
    pub fn apply(&self, config: &mut DriverConfig) {
        config.device.inputs.extend(self.bsp_in.iter().cloned());
        config.host.inputs.extend(self.host_in.iter().cloned());
        if let Some(out) = &self.bsp_out {
            config.device.output = Some(out.clone());
        }
        if let Some(out) = &self.host_out {
            config.host.output = Some(out.clone());
        }

        config.device.include_dirs.extend(self.bsp_include.iter().cloned());
        config.device.library_dirs.extend(self.bsp_lib_dir.iter().cloned());
        config.host.include_dirs.extend(self.host_include.iter().cloned());
        config.host.library_dirs.extend(self.host_lib_dir.iter().cloned());
        config.host.libraries.extend(self.libraries.iter().cloned());

        let stages = &mut config.stages;
        stages.only_compile |= self.only_compile;
        stages.compile_analyze_transform_only |= self.compile_analyze_transform_only;
        stages.emit_intermediate |= self.emit_llvm;
        stages.backend_stages |= self.backend_stages;
        if self.no_analyze {
            stages.analyze = false;
        }
        if self.no_transform {
            stages.transform = false;
        }

        if let Some(db) = &self.database {
            config.database = Some(db.clone());
        }
        if let Some(dir) = &self.temp_dir {
            config.temp_dir = Some(dir.clone());
        }
        config.dry_run |= self.dry_run;
    }
}

/// Build the layered driver configuration: file, environment, arguments.
pub fn resolve_config(args: &CompileArgs, file: CliConfig, verbose: u8) -> DriverConfig {
    let mut config = file.into_driver_config();
    config.apply_process_env();
    args.apply(&mut config);
    config.verbose = verbose;
    config
}

/// Execute the driver with the given arguments
pub async fn compile_command(args: CompileArgs, config: &CliConfig, verbose: u8) -> Result<()> {
    let config = resolve_config(&args, config.clone(), verbose);
    if !config.dry_run {
        validate_inputs(&config)?;
    }

    let summary = Driver::new(config).run().await?;
    report(&summary, verbose);
    Ok(())
}

fn validate_inputs(config: &DriverConfig) -> Result<()> {
    for input in config.device.inputs.iter().chain(&config.host.inputs) {
        if !input.exists() {
            return Err(CliError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }
    }
    Ok(())
}

fn report(summary: &RunSummary, verbose: u8) {
    info!(
        actions = summary.report.completed,
        temporaries = summary.removed_temporaries,
        "compilation finished"
    );
    if verbose > 0 {
        for kind in PipelineKind::ALL {
            let units = summary.plan.pipeline(kind);
            let output = units
                .combined()
                .or_else(|| units.units().first())
                .and_then(|unit| unit.current_output().ok());
            if let Some(output) = output {
                eprintln!(
                    "{} {} output written to {}",
                    style("✓").green(),
                    kind,
                    output.display()
                );
            }
        }
    }
}
