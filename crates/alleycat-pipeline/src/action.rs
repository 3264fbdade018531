//! External tool invocations and their construction.

use crate::config::DriverConfig;
use crate::error::{PipelineError, Result};
use crate::execute::{CommandRunner, RunMode};
use crate::stage::Stage;
use crate::toolchain::Toolchain;
use crate::unit::Unit;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Every step the driver knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// OpenCL kernel source to device IR
    ClCompile,
    /// Device IR (text or bitcode) to device bitcode
    DeviceIrCompile,
    DeviceAnalyze,
    DeviceTransform,
    /// Merge device modules and the target's device library
    DeviceLink,
    DeviceAssemble,
    /// C++ host source to host IR
    CxxCompile,
    HostIrCompile,
    HostTransform,
    /// Link host modules into the host binary
    HostLink,
    HostAssemble,
    Disassemble,
    /// Plain file copy, used where a stage has nothing to do
    Copy,
}

/// Shape of the units an action binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// One unit: its current input to its current output
    Single,
    /// First unit receives the output; every following unit is an input
    Merge,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::ClCompile => "cl-compile",
            ActionKind::DeviceIrCompile => "bsp-ll-compile",
            ActionKind::DeviceAnalyze => "bsp-analyze",
            ActionKind::DeviceTransform => "bsp-transform",
            ActionKind::DeviceLink => "bsp-link",
            ActionKind::DeviceAssemble => "bsp-asm",
            ActionKind::CxxCompile => "cc-compile",
            ActionKind::HostIrCompile => "host-ll-compile",
            ActionKind::HostTransform => "host-transform",
            ActionKind::HostLink => "host-link",
            ActionKind::HostAssemble => "host-asm",
            ActionKind::Disassemble => "disasm",
            ActionKind::Copy => "cp",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            ActionKind::DeviceLink | ActionKind::HostLink => Arity::Merge,
            _ => Arity::Single,
        }
    }

    fn check_arity(self, found: usize) -> Result<()> {
        let (ok, expected) = match self.arity() {
            Arity::Single => (found == 1, "exactly one unit"),
            Arity::Merge => (found >= 2, "an output unit and at least one input unit"),
        };
        if ok {
            Ok(())
        } else {
            Err(PipelineError::InvalidActionArguments {
                kind: self.as_str(),
                expected,
                found,
            })
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executable plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    /// Paths are kept byte-exact; only `Display` is lossy.
    pub args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn path(&mut self, path: &Path) -> &mut Self {
        self.arg(path.as_os_str())
    }

    pub fn flag_path(&mut self, flag: &str, path: &Path) -> &mut Self {
        self.arg(flag).path(path)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionResult {
    #[default]
    NotRun,
    Succeeded,
    Failed,
}

/// Position of an action in the per-stage action lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub stage: Stage,
    pub index: usize,
}

/// One external tool invocation with a memoized outcome.
#[derive(Debug, Clone)]
pub struct Action {
    kind: ActionKind,
    command: CommandLine,
    result: ActionResult,
    /// Set when the program could not be launched at all
    launch_error: Option<(io::ErrorKind, String)>,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn result(&self) -> ActionResult {
        self.result
    }

    /// Run the command once. Later calls return the recorded outcome,
    /// including a launch failure, without touching the runner.
    pub async fn run<R: CommandRunner>(&mut self, runner: &R, mode: RunMode) -> Result<bool> {
        match self.result {
            ActionResult::Succeeded => return Ok(true),
            ActionResult::Failed => {
                return match &self.launch_error {
                    Some((kind, message)) => {
                        Err(self.spawn_error(io::Error::new(*kind, message.clone())))
                    }
                    None => Ok(false),
                };
            }
            ActionResult::NotRun => {}
        }
        let succeeded = match mode {
            RunMode::DryRun => {
                runner.echo(&self.command);
                true
            }
            RunMode::Execute => match runner.invoke(&self.command).await {
                Ok(succeeded) => succeeded,
                Err(source) => {
                    self.result = ActionResult::Failed;
                    self.launch_error = Some((source.kind(), source.to_string()));
                    return Err(self.spawn_error(source));
                }
            },
        };
        self.result = if succeeded {
            ActionResult::Succeeded
        } else {
            ActionResult::Failed
        };
        Ok(succeeded)
    }

    fn spawn_error(&self, source: io::Error) -> PipelineError {
        PipelineError::Spawn {
            program: self.command.program.display().to_string(),
            source,
        }
    }
}

/// Builds command lines from an action kind, the bound units and the
/// driver configuration.
pub struct ActionFactory<'a> {
    config: &'a DriverConfig,
    toolchain: &'a Toolchain,
}

impl<'a> ActionFactory<'a> {
    pub fn new(config: &'a DriverConfig, toolchain: &'a Toolchain) -> Self {
        Self { config, toolchain }
    }

    /// `units[0]` is always the unit whose current output the action writes.
    /// Merge kinds read the current output of every following unit.
    pub fn build(&self, kind: ActionKind, units: &[&Unit]) -> Result<Action> {
        kind.check_arity(units.len())?;
        let target = units[0];
        let tools = self.toolchain;
        let toolchain = &self.config.toolchain;

        let command = match kind {
            ActionKind::ClCompile => {
                let mut cmd = CommandLine::new(&tools.clang);
                cmd.arg("-Dcl_clang_storage_class_specifiers");
                cmd.arg("-x").arg("cl");
                if let Some(include) = toolchain.libclc_include.as_deref() {
                    cmd.flag_path("-isystem", include);
                }
                cmd.arg("-include").arg("clc/clc.h");
                cmd.arg("-target").arg(toolchain.device_target.as_str());
                cmd.arg("-c").arg("-emit-llvm");
                for dir in &self.config.device.include_dirs {
                    cmd.flag_path("-I", dir);
                }
                cmd.flag_path("-o", target.current_output()?);
                cmd.path(target.current_input()?);
                cmd
            }
            ActionKind::DeviceIrCompile => {
                let mut cmd = CommandLine::new(&tools.clang);
                cmd.arg("-target").arg(toolchain.device_target.as_str());
                cmd.arg("-c").arg("-emit-llvm");
                cmd.flag_path("-o", target.current_output()?);
                cmd.path(target.current_input()?);
                cmd
            }
            ActionKind::DeviceAnalyze => self.pass(kind, "bsp_analysis", target)?,
            ActionKind::DeviceTransform => self.pass(kind, "bsp_transform", target)?,
            ActionKind::HostTransform => self.pass(kind, "host_transform", target)?,
            ActionKind::DeviceLink => {
                let mut cmd = CommandLine::new(&tools.llvm_link);
                cmd.flag_path("-o", target.current_output()?);
                for input in &units[1..] {
                    cmd.path(input.current_output()?);
                }
                cmd.path(&self.device_library());
                cmd
            }
            ActionKind::DeviceAssemble => {
                let mut cmd = CommandLine::new(&tools.clang);
                cmd.arg("-target").arg(toolchain.device_target.as_str());
                cmd.arg("-S");
                cmd.flag_path("-o", target.current_output()?);
                cmd.path(target.current_input()?);
                cmd
            }
            ActionKind::CxxCompile => {
                let mut cmd = CommandLine::new(&tools.clangxx);
                cmd.arg("-c");
                cmd.flag_path("-o", target.current_output()?);
                cmd.path(target.current_input()?);
                if let Some(include) = toolchain.cuda_include.as_deref() {
                    cmd.flag_path("-I", include);
                }
                cmd.flag_path("-I", &toolchain.support_include);
                cmd.arg("-include").arg("alleycat.h");
                cmd.arg("-std=c++0x");
                cmd.arg("-emit-llvm");
                for dir in &self.config.host.include_dirs {
                    cmd.flag_path("-I", dir);
                }
                cmd
            }
            ActionKind::HostIrCompile => {
                let mut cmd = CommandLine::new(&tools.clangxx);
                cmd.arg("-S");
                cmd.flag_path("-o", target.current_output()?);
                cmd.path(target.current_input()?);
                cmd.arg("-emit-llvm");
                cmd
            }
            ActionKind::HostLink => {
                let mut cmd = CommandLine::new(&tools.clangxx);
                cmd.flag_path("-o", target.current_output()?);
                for input in &units[1..] {
                    cmd.path(input.current_output()?);
                }
                if let Some(lib) = toolchain.cuda_lib.as_deref() {
                    cmd.flag_path("-L", lib).arg("-lcuda");
                }
                cmd.flag_path("-L", &toolchain.runtime_lib_dir);
                cmd.arg("-ljsoncpp").arg("-lbitop");
                for dir in &self.config.host.library_dirs {
                    cmd.flag_path("-L", dir);
                }
                for lib in &self.config.host.libraries {
                    cmd.arg(format!("-l{}", lib));
                }
                cmd
            }
            ActionKind::HostAssemble => {
                let mut cmd = CommandLine::new(&tools.clangxx);
                cmd.arg("-S");
                cmd.flag_path("-o", target.current_output()?);
                cmd.path(target.current_input()?);
                cmd
            }
            ActionKind::Disassemble => {
                let mut cmd = CommandLine::new(&tools.llvm_dis);
                cmd.flag_path("-o", target.current_output()?);
                cmd.path(target.current_input()?);
                cmd
            }
            ActionKind::Copy => {
                let mut cmd = CommandLine::new(&tools.cp);
                cmd.path(target.current_input()?);
                cmd.path(target.current_output()?);
                cmd
            }
        };

        Ok(Action {
            kind,
            command,
            result: ActionResult::NotRun,
            launch_error: None,
        })
    }

    /// `opt` with one out-of-tree pass plugin reading and updating the
    /// analysis database.
    fn pass(&self, kind: ActionKind, plugin: &str, target: &Unit) -> Result<CommandLine> {
        let database = self
            .config
            .database
            .as_deref()
            .ok_or(PipelineError::MissingConfig {
                kind: kind.as_str(),
                what: "an analysis database",
            })?;
        let mut cmd = CommandLine::new(&self.toolchain.opt);
        cmd.flag_path(
            "-load",
            &self.config.toolchain.plugin_dir.join(format!("{}.so", plugin)),
        );
        cmd.arg(format!("-{}", plugin));
        cmd.flag_path("-alleycat_db", database);
        cmd.flag_path("-o", target.current_output()?);
        cmd.path(target.current_input()?);
        Ok(cmd)
    }

    /// The target's device library (`<target>.bc`), taken from libclc when
    /// configured, else from the first device library dir that has it.
    fn device_library(&self) -> PathBuf {
        let file = format!("{}.bc", self.config.toolchain.device_target);
        if let Some(dir) = self.config.toolchain.libclc_lib.as_deref() {
            return dir.join(file);
        }
        self.config
            .device
            .library_dirs
            .iter()
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::RecordingRunner;
    use pretty_assertions::assert_eq;

    fn config() -> DriverConfig {
        let mut config = DriverConfig::default();
        config.database = Some(PathBuf::from("ac.db"));
        config
    }

    fn toolchain() -> Toolchain {
        Toolchain::in_dir(Path::new("/llvm"))
    }

    fn unit_at(source: &str, outputs: &[&str]) -> Unit {
        let mut unit = Unit::from_source(source);
        for output in outputs {
            unit.append_final_output(Path::new(output));
        }
        unit
    }

    fn args(action: &Action) -> Vec<&str> {
        action
            .command()
            .args
            .iter()
            .map(|arg| arg.to_str().unwrap())
            .collect()
    }

    #[test]
    fn cl_compile_template() {
        let mut config = config();
        config.device.include_dirs = vec![PathBuf::from("inc/a")];
        config.toolchain.libclc_include = Some(PathBuf::from("/libclc/include"));
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = unit_at("k.cl", &["/tmp/x-k.bc"]);

        let action = factory.build(ActionKind::ClCompile, &[&unit]).unwrap();
        assert_eq!(action.command().program, PathBuf::from("/llvm/clang"));
        assert_eq!(
            args(&action),
            vec![
                "-Dcl_clang_storage_class_specifiers",
                "-x",
                "cl",
                "-isystem",
                "/libclc/include",
                "-include",
                "clc/clc.h",
                "-target",
                "nvptx64--nvidiacl",
                "-c",
                "-emit-llvm",
                "-I",
                "inc/a",
                "-o",
                "/tmp/x-k.bc",
                "k.cl",
            ]
        );
    }

    #[test]
    fn analyze_reads_previous_artifact() {
        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = unit_at("k.cl", &["a.bc", "b.bc"]);

        let action = factory.build(ActionKind::DeviceAnalyze, &[&unit]).unwrap();
        assert_eq!(action.command().program, PathBuf::from("/llvm/opt"));
        assert_eq!(
            args(&action),
            vec![
                "-load",
                "./lib/bsp_analysis.so",
                "-bsp_analysis",
                "-alleycat_db",
                "ac.db",
                "-o",
                "b.bc",
                "a.bc",
            ]
        );
    }

    #[test]
    fn transform_without_database_is_rejected() {
        let config = DriverConfig::default();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = unit_at("main.cc", &["a.bc", "b.bc"]);

        assert!(matches!(
            factory.build(ActionKind::HostTransform, &[&unit]),
            Err(PipelineError::MissingConfig { kind: "host-transform", .. })
        ));
    }

    #[test]
    fn device_link_merges_current_outputs_and_device_library() {
        let mut config = config();
        config.toolchain.libclc_lib = Some(PathBuf::from("/libclc/lib"));
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let a = unit_at("a.cl", &["a1.bc", "a2.bc"]);
        let b = unit_at("b.cl", &["b1.bc", "b2.bc"]);
        let mut combined = Unit::combined(Path::new("out.bc"));
        combined.append_final_output(Path::new("out.bc"));

        let action = factory
            .build(ActionKind::DeviceLink, &[&combined, &a, &b])
            .unwrap();
        assert_eq!(
            args(&action),
            vec!["-o", "out.bc", "a2.bc", "b2.bc", "/libclc/lib/nvptx64--nvidiacl.bc"]
        );
    }

    #[test]
    fn host_link_adds_runtime_and_user_libraries() {
        let mut config = config();
        config.toolchain.cuda_lib = Some(PathBuf::from("/cuda/lib64"));
        config.host.library_dirs = vec![PathBuf::from("/opt/lib")];
        config.host.libraries = vec!["m".to_string()];
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let main = unit_at("main.cc", &["main.bc"]);
        let mut combined = Unit::combined(Path::new("app"));
        combined.append_final_output(Path::new("app"));

        let action = factory.build(ActionKind::HostLink, &[&combined, &main]).unwrap();
        assert_eq!(action.command().program, PathBuf::from("/llvm/clang++"));
        assert_eq!(
            args(&action),
            vec![
                "-o",
                "app",
                "main.bc",
                "-L",
                "/cuda/lib64",
                "-lcuda",
                "-L",
                "./lib",
                "-ljsoncpp",
                "-lbitop",
                "-L",
                "/opt/lib",
                "-lm",
            ]
        );
    }

    #[test]
    fn arity_is_checked_before_building() {
        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let a = unit_at("a.cl", &["a.bc"]);
        let b = unit_at("b.cl", &["b.bc"]);

        assert!(matches!(
            factory.build(ActionKind::ClCompile, &[&a, &b]),
            Err(PipelineError::InvalidActionArguments { found: 2, .. })
        ));
        assert!(matches!(
            factory.build(ActionKind::DeviceLink, &[&a]),
            Err(PipelineError::InvalidActionArguments { found: 1, .. })
        ));
        assert!(matches!(
            factory.build(ActionKind::Copy, &[]),
            Err(PipelineError::InvalidActionArguments { found: 0, .. })
        ));
    }

    #[test]
    fn unit_without_output_cannot_be_bound() {
        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = Unit::from_source("k.cl");

        assert!(matches!(
            factory.build(ActionKind::DeviceIrCompile, &[&unit]),
            Err(PipelineError::NoOutputAssigned { .. })
        ));
    }

    #[test]
    fn copy_moves_input_to_output() {
        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = unit_at("main.cc", &["a.bc", "b.bc"]);

        let action = factory.build(ActionKind::Copy, &[&unit]).unwrap();
        assert_eq!(args(&action), vec!["a.bc", "b.bc"]);
    }

    #[tokio::test]
    async fn run_is_memoized() {
        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = unit_at("main.cc", &["a.bc", "b.bc"]);
        let mut action = factory.build(ActionKind::Copy, &[&unit]).unwrap();
        let runner = RecordingRunner::failing_on("cp");

        assert!(!action.run(&runner, RunMode::Execute).await.unwrap());
        assert!(!action.run(&runner, RunMode::Execute).await.unwrap());
        assert_eq!(runner.invocations().len(), 1);
        assert_eq!(action.result(), ActionResult::Failed);
    }

    #[tokio::test]
    async fn launch_failure_is_memoized() {
        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = unit_at("main.cc", &["a.bc", "b.bc"]);
        let mut action = factory.build(ActionKind::Copy, &[&unit]).unwrap();
        let runner = RecordingRunner::unlaunchable("cp");

        for _ in 0..2 {
            match action.run(&runner, RunMode::Execute).await {
                Err(PipelineError::Spawn { source, .. }) => {
                    assert_eq!(source.kind(), io::ErrorKind::NotFound);
                    assert_eq!(source.to_string(), "no such program");
                }
                other => panic!("expected a launch failure, got {other:?}"),
            }
        }
        assert_eq!(runner.invocations().len(), 1);
        assert_eq!(action.result(), ActionResult::Failed);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_pass_through_unchanged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let source = Path::new(OsStr::from_bytes(b"k\xff.cl"));
        let output = Path::new(OsStr::from_bytes(b"out\xfe.bc"));
        let mut unit = Unit::from_source(source);
        unit.append_final_output(output);

        let action = factory.build(ActionKind::ClCompile, &[&unit]).unwrap();
        let args = &action.command().args;
        assert_eq!(args[args.len() - 1].as_os_str(), source.as_os_str());
        assert_eq!(args[args.len() - 2].as_os_str(), output.as_os_str());
        assert!(action.command().to_string().ends_with("k\u{fffd}.cl"));
    }

    #[tokio::test]
    async fn dry_run_echoes_instead_of_invoking() {
        let config = config();
        let toolchain = toolchain();
        let factory = ActionFactory::new(&config, &toolchain);
        let unit = unit_at("k.ll", &["k.bc"]);
        let mut action = factory.build(ActionKind::DeviceIrCompile, &[&unit]).unwrap();
        let runner = RecordingRunner::default();

        assert!(action.run(&runner, RunMode::DryRun).await.unwrap());
        assert!(runner.invocations().is_empty());
        assert_eq!(
            runner.echoed(),
            vec!["/llvm/clang -target nvptx64--nvidiacl -c -emit-llvm -o k.bc k.ll".to_string()]
        );
    }
}
