use crate::assemble::{Assembler, BuildPlan};
use crate::config::DriverConfig;
use crate::error::Result;
use crate::execute::{execute, CommandRunner, ExecutionReport, ProcessRunner, RunMode};
use crate::stage::StagePlan;
use crate::temp::TempArena;
use crate::toolchain::Toolchain;
use tracing::{debug, info};

/// Outcome of a successful run.
#[derive(Debug)]
pub struct RunSummary {
    pub plan: BuildPlan,
    pub report: ExecutionReport,
    /// Temporary artifacts deleted after execution
    pub removed_temporaries: usize,
}

/// One invocation of the compiler driver: plan the stages, assemble the
/// actions, execute them and remove every temporary artifact.
pub struct Driver<R = ProcessRunner> {
    config: DriverConfig,
    runner: R,
    assembler: Assembler,
}

impl Driver<ProcessRunner> {
    pub fn new(config: DriverConfig) -> Self {
        Self::with_runner(config, ProcessRunner)
    }
}

impl<R: CommandRunner> Driver<R> {
    pub fn with_runner(config: DriverConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            assembler: Assembler::standard(),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Temporaries are removed whether execution succeeds or fails.
    pub async fn run(&self) -> Result<RunSummary> {
        let stages = StagePlan::resolve(&self.config)?;
        let toolchain = Toolchain::locate(&self.config.toolchain);
        debug!(?toolchain, "located toolchain");

        let mut arena = match self.config.temp_dir.as_deref() {
            Some(dir) => TempArena::new(dir),
            None => TempArena::in_system_temp(),
        };
        let outcome = self.assemble_and_execute(&stages, &toolchain, &mut arena).await;
        let removed_temporaries = arena.cleanup_all();
        debug!(removed = removed_temporaries, "cleaned up temporary files");

        let (plan, report) = outcome?;
        info!(
            actions = report.completed,
            last_stage = %stages.last(),
            "driver run finished"
        );
        Ok(RunSummary {
            plan,
            report,
            removed_temporaries,
        })
    }

    async fn assemble_and_execute(
        &self,
        stages: &StagePlan,
        toolchain: &Toolchain,
        arena: &mut TempArena,
    ) -> Result<(BuildPlan, ExecutionReport)> {
        let mut plan = self
            .assembler
            .assemble(&self.config, stages, toolchain, arena)?;
        let mode = RunMode::from_dry_run(self.config.dry_run);
        let report = execute(&mut plan.actions, &self.runner, mode).await?;
        Ok((plan, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::execute::RecordingRunner;
    use std::path::PathBuf;

    fn device_config(temp: &std::path::Path) -> DriverConfig {
        let mut config = DriverConfig::default();
        config.device.inputs = vec![PathBuf::from("a.cl"), PathBuf::from("b.cl")];
        config.device.output = Some(PathBuf::from("kernels.bc"));
        config.database = Some(PathBuf::from("ac.db"));
        config.toolchain.root = Some(PathBuf::from("/llvm"));
        config.temp_dir = Some(temp.to_path_buf());
        config
    }

    #[tokio::test]
    async fn runs_every_action_in_stage_order() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::with_runner(device_config(dir.path()), RecordingRunner::default());

        let summary = driver.run().await.unwrap();
        assert_eq!(summary.report.completed, 7);
        assert_eq!(summary.removed_temporaries, 6);

        let invoked = driver.runner().invocations();
        assert!(invoked[0].starts_with("/llvm/clang "));
        assert!(invoked[1].starts_with("/llvm/clang "));
        assert!(invoked[2].starts_with("/llvm/opt "));
        assert!(invoked[6].starts_with("/llvm/llvm-link -o kernels.bc "));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failure_stops_the_run_and_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::with_runner(
            device_config(dir.path()),
            RecordingRunner::failing_on("opt"),
        );

        let err = driver.run().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SubcommandFailed {
                kind: "bsp-analyze",
                ..
            }
        ));
        assert_eq!(driver.runner().invocations().len(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn dry_run_echoes_without_invoking() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = device_config(dir.path());
        config.dry_run = true;
        let driver = Driver::with_runner(config, RecordingRunner::default());

        let summary = driver.run().await.unwrap();
        assert!(driver.runner().invocations().is_empty());
        assert_eq!(driver.runner().echoed().len(), summary.plan.actions.len());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn invalid_flags_fail_before_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = device_config(dir.path());
        config.database = None;
        let driver = Driver::with_runner(config, RecordingRunner::default());

        let err = driver.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::DatabaseRequired));
        assert!(driver.runner().invocations().is_empty());
    }
}
