use crate::action::{Action, CommandLine};
use crate::assemble::StageActions;
use crate::error::{PipelineError, Result};
use crate::stage::Stage;
use std::io;
#[cfg(test)]
use std::sync::Mutex;
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Execute,
    /// Print each command instead of running it
    DryRun,
}

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Execute
        }
    }
}

/// Launches external commands on behalf of actions.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run the command to completion; `Ok(true)` iff it exited with status 0.
    async fn invoke(&self, command: &CommandLine) -> io::Result<bool>;

    /// Report a command in dry-run mode.
    fn echo(&self, command: &CommandLine) {
        println!("{}", command);
    }
}

/// Spawns real child processes and waits for each one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn invoke(&self, command: &CommandLine) -> io::Result<bool> {
        debug!(command = %command, "running");
        let status = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .status()
            .await?;
        Ok(status.success())
    }
}

/// Records commands instead of running them. Commands whose program file
/// name matches `fail_on` exit unsuccessfully; those matching
/// `unlaunchable` cannot be spawned.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingRunner {
    fail_on: Option<String>,
    unlaunchable: Option<String>,
    invocations: Mutex<Vec<String>>,
    echoed: Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn failing_on(program: impl Into<String>) -> Self {
        Self {
            fail_on: Some(program.into()),
            ..Self::default()
        }
    }

    pub fn unlaunchable(program: impl Into<String>) -> Self {
        Self {
            unlaunchable: Some(program.into()),
            ..Self::default()
        }
    }

    pub fn invocations(&self) -> Vec<String> {
        lock(&self.invocations).clone()
    }

    pub fn echoed(&self) -> Vec<String> {
        lock(&self.echoed).clone()
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    async fn invoke(&self, command: &CommandLine) -> io::Result<bool> {
        lock(&self.invocations).push(command.to_string());
        let program = command
            .program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        if self.unlaunchable.is_some() && program == self.unlaunchable {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }
        Ok(self.fail_on.is_none() || program != self.fail_on)
    }

    fn echo(&self, command: &CommandLine) {
        lock(&self.echoed).push(command.to_string());
    }
}

#[cfg(test)]
fn lock(entries: &Mutex<Vec<String>>) -> std::sync::MutexGuard<'_, Vec<String>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Actions that ran (or were echoed) successfully, in order
    pub completed: usize,
}

/// Run every stage's actions in stage order, stopping at the first failure.
pub async fn execute<R: CommandRunner>(
    actions: &mut StageActions,
    runner: &R,
    mode: RunMode,
) -> Result<ExecutionReport> {
    let mut report = ExecutionReport::default();
    for stage in Stage::ALL {
        let list = actions.stage_mut(stage);
        if list.is_empty() {
            continue;
        }
        report.completed += run_stage(list, runner, mode)
            .instrument(info_span!("stage", stage = %stage))
            .await?;
    }
    Ok(report)
}

async fn run_stage<R: CommandRunner>(
    actions: &mut [Action],
    runner: &R,
    mode: RunMode,
) -> Result<usize> {
    let mut completed = 0;
    for action in actions.iter_mut() {
        if !action.run(runner, mode).await? {
            return Err(subcommand_failed(action));
        }
        completed += 1;
    }
    Ok(completed)
}

fn subcommand_failed(action: &Action) -> PipelineError {
    PipelineError::SubcommandFailed {
        kind: action.kind().as_str(),
        command: action.command().to_string(),
    }
}
