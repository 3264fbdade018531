//! Stage selection for a driver run.
//!
//! Each stage's activation is derived from the command-line flags rather
//! than from its predecessor; execution still walks the stages in order.

use crate::config::{DriverConfig, StageOptions};
use crate::error::{PipelineError, Result};
use std::fmt;
use tracing::{debug, warn};

/// One of the two independent processing tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// BSP code, compiled for the accelerator target
    Device,
    Host,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 2] = [PipelineKind::Device, PipelineKind::Host];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Device => "bsp",
            PipelineKind::Host => "host",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Compile,
    Analyze,
    Transform,
    Link,
    Assemble,
    Disassemble,
}

impl Stage {
    pub const COUNT: usize = 6;
    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::Compile,
        Stage::Analyze,
        Stage::Transform,
        Stage::Link,
        Stage::Assemble,
        Stage::Disassemble,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Analyze => "analyze",
            Stage::Transform => "transform",
            Stage::Link => "link",
            Stage::Assemble => "assemble",
            Stage::Disassemble => "disassemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation vector plus the last active stage, which is the only one
/// allowed to write the user-specified output paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    active: [bool; Stage::COUNT],
    last: Stage,
}

impl StagePlan {
    /// Compute stage activation from the flags alone.
    pub fn from_options(options: &StageOptions) -> Self {
        let mut active = [false; Stage::COUNT];
        active[Stage::Compile.index()] = true;
        active[Stage::Analyze.index()] = !options.only_compile && options.analyze;
        active[Stage::Transform.index()] = !options.only_compile && options.transform;
        active[Stage::Link.index()] =
            !options.only_compile && !options.compile_analyze_transform_only;
        active[Stage::Assemble.index()] =
            active[Stage::Link.index()] && !options.emit_intermediate;
        active[Stage::Disassemble.index()] = !active[Stage::Link.index()]
            && !active[Stage::Assemble.index()]
            && options.emit_intermediate;

        if !options.backend_stages
            && (active[Stage::Assemble.index()] || active[Stage::Disassemble.index()])
        {
            warn!("assemble and disassemble stages are disabled; pass --backend-stages to enable them");
            active[Stage::Assemble.index()] = false;
            active[Stage::Disassemble.index()] = false;
        }

        // compile is unconditionally active, so a last stage always exists
        let last = Stage::ALL
            .iter()
            .rev()
            .copied()
            .find(|stage| active[stage.index()])
            .unwrap_or(Stage::Compile);

        Self { active, last }
    }

    /// Plan the stages and reject invalid input/output/flag combinations
    /// before any action is constructed.
    pub fn resolve(config: &DriverConfig) -> Result<Self> {
        let plan = Self::from_options(&config.stages);
        debug!(stages = ?plan.active, last = %plan.last, "planned stages");
        plan.validate(config)?;
        Ok(plan)
    }

    pub fn is_active(&self, stage: Stage) -> bool {
        self.active[stage.index()]
    }

    pub fn last(&self) -> Stage {
        self.last
    }

    pub fn is_last(&self, stage: Stage) -> bool {
        self.last == stage
    }

    pub fn active_stages(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL
            .into_iter()
            .filter(move |stage| self.is_active(*stage))
    }

    fn validate(&self, config: &DriverConfig) -> Result<()> {
        let device = &config.device;
        let host = &config.host;

        if !device.is_active() && !host.is_active() {
            return Err(PipelineError::NoInputFiles);
        }
        if device.output.is_some() && !device.is_active() {
            return Err(PipelineError::OutputWithoutInput {
                pipeline: PipelineKind::Device,
            });
        }
        if device.is_active() && device.output.is_none() {
            return Err(PipelineError::MissingOutput {
                pipeline: PipelineKind::Device,
            });
        }
        if host.is_active() && host.output.is_none() {
            return Err(PipelineError::MissingOutput {
                pipeline: PipelineKind::Host,
            });
        }
        if (self.is_active(Stage::Analyze) || self.is_active(Stage::Transform))
            && config.database.is_none()
        {
            return Err(PipelineError::DatabaseRequired);
        }
        if host.output.is_some() && !host.is_active() {
            return Err(PipelineError::OutputWithoutInput {
                pipeline: PipelineKind::Host,
            });
        }
        if !self.is_active(Stage::Link) {
            for kind in PipelineKind::ALL {
                if config.pipeline(kind).inputs.len() > 1 {
                    return Err(PipelineError::MultipleInputsWithoutLink { pipeline: kind });
                }
            }
        }
        if (self.is_active(Stage::Link) || self.is_active(Stage::Assemble))
            && config.stages.emit_intermediate
        {
            return Err(PipelineError::IntermediateAfterLink);
        }
        Ok(())
    }
}
