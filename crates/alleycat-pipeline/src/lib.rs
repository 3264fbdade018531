pub mod action;
pub mod assemble;
pub mod config;
pub mod driver;
pub mod error;
pub mod execute;
pub mod stage;
pub mod temp;
pub mod toolchain;
pub mod unit;

pub use action::{Action, ActionFactory, ActionId, ActionKind, ActionResult, CommandLine};
pub use assemble::{
    Assembler, AssemblerBuilder, AssemblyContext, BuildPlan, PipelineStage, PipelineUnits,
    StageActions,
};
pub use config::{DriverConfig, PipelineConfig, StageOptions, ToolchainConfig};
pub use driver::{Driver, RunSummary};
pub use error::{ErrorCategory, PipelineError, Result};
pub use execute::{execute, CommandRunner, ExecutionReport, ProcessRunner, RunMode};
pub use stage::{PipelineKind, Stage, StagePlan};
pub use temp::TempArena;
pub use toolchain::Toolchain;
pub use unit::{InputFormat, Unit};
