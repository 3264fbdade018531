//! Turns a stage plan into per-stage action lists.
//!
//! Every active stage visits the device pipeline before the host pipeline.
//! Compile, analyze and transform bind each input unit; link binds one
//! combined unit per pipeline that merges all of them; assemble and
//! disassemble bind the pipeline's single remaining carrier.

use crate::action::{Action, ActionFactory, ActionId, ActionKind};
use crate::config::DriverConfig;
use crate::error::{PipelineError, Result};
use crate::stage::{PipelineKind, Stage, StagePlan};
use crate::temp::TempArena;
use crate::toolchain::Toolchain;
use crate::unit::{InputFormat, Unit};
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span};

/// Which action handles an artifact of `format` at `stage` of `pipeline`.
/// `None` means the format is not accepted there.
pub fn dispatch(
    pipeline: PipelineKind,
    stage: Stage,
    format: Option<InputFormat>,
) -> Option<ActionKind> {
    use InputFormat::*;
    use PipelineKind::*;

    let kind = match (pipeline, stage, format?) {
        (Device, Stage::Compile, OpenCl) => ActionKind::ClCompile,
        (Device, Stage::Compile, IrText | IrBinary) => ActionKind::DeviceIrCompile,
        (Host, Stage::Compile, CxxSource) => ActionKind::CxxCompile,
        (Host, Stage::Compile, IrText | IrBinary) => ActionKind::HostIrCompile,
        (Device, Stage::Analyze, IrText | IrBinary) => ActionKind::DeviceAnalyze,
        // no host analysis pass; keep the timeline with a copy
        (Host, Stage::Analyze, IrText | IrBinary) => ActionKind::Copy,
        (Device, Stage::Transform, IrText | IrBinary) => ActionKind::DeviceTransform,
        (Host, Stage::Transform, IrText | IrBinary) => ActionKind::HostTransform,
        (Device, Stage::Link, IrText | IrBinary) => ActionKind::DeviceLink,
        (Host, Stage::Link, IrText | IrBinary) => ActionKind::HostLink,
        (Device, Stage::Assemble, IrText | IrBinary) => ActionKind::DeviceAssemble,
        (Host, Stage::Assemble, IrText | IrBinary) => ActionKind::HostAssemble,
        (_, Stage::Disassemble, IrText | IrBinary) => ActionKind::Disassemble,
        (_, _, OpenCl | CxxSource) => return None,
    };
    Some(kind)
}

/// Action lists indexed by stage, in assembly order.
#[derive(Debug, Default)]
pub struct StageActions {
    lists: [Vec<Action>; Stage::COUNT],
}

impl StageActions {
    pub fn stage(&self, stage: Stage) -> &[Action] {
        &self.lists[stage.index()]
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut [Action] {
        &mut self.lists[stage.index()]
    }

    pub fn get(&self, id: ActionId) -> Option<&Action> {
        self.lists[id.stage.index()].get(id.index)
    }

    pub fn len(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All actions in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.lists.iter().flatten()
    }

    fn push(&mut self, stage: Stage, action: Action) -> ActionId {
        let list = &mut self.lists[stage.index()];
        list.push(action);
        ActionId {
            stage,
            index: list.len() - 1,
        }
    }
}

/// Units of one pipeline: one per input file plus, once linking has been
/// assembled, the combined unit.
#[derive(Debug)]
pub struct PipelineUnits {
    units: Vec<Unit>,
    combined: Option<Unit>,
}

impl PipelineUnits {
    fn new(inputs: &[PathBuf]) -> Self {
        Self {
            units: inputs.iter().map(Unit::from_source).collect(),
            combined: None,
        }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn combined(&self) -> Option<&Unit> {
        self.combined.as_ref()
    }

    pub fn is_active(&self) -> bool {
        !self.units.is_empty()
    }
}

/// Result of assembly: the units with their artifact timelines and the
/// actions to execute.
#[derive(Debug)]
pub struct BuildPlan {
    pub stages: StagePlan,
    pub device: PipelineUnits,
    pub host: PipelineUnits,
    pub actions: StageActions,
}

impl BuildPlan {
    pub fn pipeline(&self, kind: PipelineKind) -> &PipelineUnits {
        match kind {
            PipelineKind::Device => &self.device,
            PipelineKind::Host => &self.host,
        }
    }

    fn split_mut(&mut self, kind: PipelineKind) -> (&mut PipelineUnits, &mut StageActions) {
        match kind {
            PipelineKind::Device => (&mut self.device, &mut self.actions),
            PipelineKind::Host => (&mut self.host, &mut self.actions),
        }
    }
}

/// State shared by the stage assemblers while building one plan.
pub struct AssemblyContext<'a> {
    config: &'a DriverConfig,
    stages: StagePlan,
    factory: ActionFactory<'a>,
    arena: &'a mut TempArena,
    plan: BuildPlan,
}

impl AssemblyContext<'_> {
    fn final_output(&self, kind: PipelineKind) -> Result<&Path> {
        self.config
            .pipeline(kind)
            .output
            .as_deref()
            .ok_or(PipelineError::MissingOutput { pipeline: kind })
    }

    /// Extension for a temporary written by `stage`.
    fn temp_extension(&self, stage: Stage) -> &'static str {
        match stage {
            Stage::Analyze | Stage::Transform => InputFormat::IrBinary.extension(),
            _ if self.config.stages.emit_intermediate => InputFormat::IrText.extension(),
            _ => InputFormat::IrBinary.extension(),
        }
    }
}

/// Give `unit` its output for `stage`: the final path on the last active
/// stage, a fresh temporary otherwise.
fn attach_output(
    unit: &mut Unit,
    arena: &mut TempArena,
    final_output: Option<&Path>,
    extension: &str,
) -> Result<()> {
    match final_output {
        Some(path) => {
            unit.append_final_output(path);
        }
        None => {
            unit.append_temporary_output(arena, extension)?;
        }
    }
    Ok(())
}

fn unrecognized(unit: &Unit, pipeline: PipelineKind, stage: Stage) -> PipelineError {
    PipelineError::UnrecognizedInputFormat {
        path: unit
            .next_input()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(unit.name())),
        pipeline,
        stage,
    }
}

/// One stage of assembly, run once per active pipeline.
pub trait PipelineStage {
    fn stage(&self) -> Stage;
    fn run(&self, pipeline: PipelineKind, context: &mut AssemblyContext<'_>) -> Result<()>;
}

/// Compile, analyze and transform: one action per input unit.
pub struct UnitStage(pub Stage);

impl PipelineStage for UnitStage {
    fn stage(&self) -> Stage {
        self.0
    }

    fn run(&self, pipeline: PipelineKind, context: &mut AssemblyContext<'_>) -> Result<()> {
        let stage = self.0;
        let final_output = if context.stages.is_last(stage) {
            Some(context.final_output(pipeline)?.to_path_buf())
        } else {
            None
        };
        let extension = context.temp_extension(stage);
        let AssemblyContext {
            factory,
            arena,
            plan,
            ..
        } = context;
        let (units, actions) = plan.split_mut(pipeline);

        for unit in units.units.iter_mut() {
            let format = unit.next_input().and_then(InputFormat::from_path);
            let kind = dispatch(pipeline, stage, format)
                .ok_or_else(|| unrecognized(unit, pipeline, stage))?;
            attach_output(unit, arena, final_output.as_deref(), extension)?;
            let action = factory.build(kind, &[&*unit])?;
            let id = actions.push(stage, action);
            unit.record_action(id);
        }
        Ok(())
    }
}

/// Merge every unit of a pipeline into the combined unit.
pub struct LinkStage;

impl PipelineStage for LinkStage {
    fn stage(&self) -> Stage {
        Stage::Link
    }

    fn run(&self, pipeline: PipelineKind, context: &mut AssemblyContext<'_>) -> Result<()> {
        let output = context.final_output(pipeline)?.to_path_buf();
        let final_output = context.stages.is_last(Stage::Link).then_some(output.as_path());
        let extension = context.temp_extension(Stage::Link);
        let AssemblyContext {
            factory,
            arena,
            plan,
            ..
        } = context;
        let (units, actions) = plan.split_mut(pipeline);

        let mut kind = None;
        for unit in &units.units {
            let format = unit.current_output().ok().and_then(InputFormat::from_path);
            kind = Some(
                dispatch(pipeline, Stage::Link, format)
                    .ok_or_else(|| unrecognized(unit, pipeline, Stage::Link))?,
            );
        }
        let kind = kind.ok_or(PipelineError::InvalidActionArguments {
            kind: "link",
            expected: "an output unit and at least one input unit",
            found: 1,
        })?;

        let combined = units
            .combined
            .get_or_insert_with(|| Unit::combined(&output));
        attach_output(combined, arena, final_output, extension)?;
        let action = {
            let mut bound: Vec<&Unit> = Vec::with_capacity(units.units.len() + 1);
            bound.push(&*combined);
            bound.extend(units.units.iter());
            factory.build(kind, &bound)?
        };
        debug!(
            pipeline = %pipeline,
            inputs = units.units.len(),
            "linking into combined unit"
        );
        let id = actions.push(Stage::Link, action);
        combined.record_action(id);
        Ok(())
    }
}

/// Assemble and disassemble: single-file steps on the pipeline's carrier,
/// the combined unit when linking ran, else the pipeline's only unit.
pub struct CarrierStage(pub Stage);

impl PipelineStage for CarrierStage {
    fn stage(&self) -> Stage {
        self.0
    }

    fn run(&self, pipeline: PipelineKind, context: &mut AssemblyContext<'_>) -> Result<()> {
        let stage = self.0;
        if !context.stages.is_last(stage) {
            return Err(PipelineError::StageOrdering { stage });
        }
        let output = context.final_output(pipeline)?.to_path_buf();
        let AssemblyContext {
            factory,
            arena,
            plan,
            ..
        } = context;
        let (units, actions) = plan.split_mut(pipeline);

        let carrier = match units.combined.as_mut() {
            Some(combined) => combined,
            None => match units.units.as_mut_slice() {
                [only] => only,
                others => {
                    return Err(PipelineError::InvalidActionArguments {
                        kind: stage.as_str(),
                        expected: "exactly one unit",
                        found: others.len(),
                    })
                }
            },
        };
        let format = carrier.next_input().and_then(InputFormat::from_path);
        let kind = dispatch(pipeline, stage, format)
            .ok_or_else(|| unrecognized(carrier, pipeline, stage))?;
        attach_output(carrier, arena, Some(&output), "")?;
        let action = factory.build(kind, &[&*carrier])?;
        let id = actions.push(stage, action);
        carrier.record_action(id);
        Ok(())
    }
}

/// Ordered set of stage assemblers.
pub struct Assembler {
    stages: Vec<Box<dyn PipelineStage>>,
}

pub struct AssemblerBuilder {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl AssemblerBuilder {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn add_stage<S>(mut self, stage: S) -> Self
    where
        S: PipelineStage + 'static,
    {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn build(mut self) -> Assembler {
        self.stages.sort_by_key(|stage| stage.stage());
        Assembler {
            stages: self.stages,
        }
    }
}

impl Default for AssemblerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// All six stages.
    pub fn standard() -> Self {
        AssemblerBuilder::new()
            .add_stage(UnitStage(Stage::Compile))
            .add_stage(UnitStage(Stage::Analyze))
            .add_stage(UnitStage(Stage::Transform))
            .add_stage(LinkStage)
            .add_stage(CarrierStage(Stage::Assemble))
            .add_stage(CarrierStage(Stage::Disassemble))
            .build()
    }

    pub fn assemble(
        &self,
        config: &DriverConfig,
        stages: &StagePlan,
        toolchain: &Toolchain,
        arena: &mut TempArena,
    ) -> Result<BuildPlan> {
        for kind in PipelineKind::ALL {
            let inputs = &config.pipeline(kind).inputs;
            if !inputs.is_empty() {
                info!(
                    "Files in {} pipeline: {}",
                    kind,
                    inputs
                        .iter()
                        .map(|path| path.display().to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                );
            }
        }

        let mut context = AssemblyContext {
            config,
            stages: *stages,
            factory: ActionFactory::new(config, toolchain),
            arena,
            plan: BuildPlan {
                stages: *stages,
                device: PipelineUnits::new(&config.device.inputs),
                host: PipelineUnits::new(&config.host.inputs),
                actions: StageActions::default(),
            },
        };

        for stage in &self.stages {
            if !stages.is_active(stage.stage()) {
                continue;
            }
            let _span = info_span!("assemble", stage = %stage.stage()).entered();
            for kind in PipelineKind::ALL {
                if context.plan.pipeline(kind).is_active() {
                    stage.run(kind, &mut context)?;
                }
            }
        }
        Ok(context.plan)
    }
}
