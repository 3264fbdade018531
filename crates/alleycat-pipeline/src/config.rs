use crate::stage::PipelineKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_TOOLS_DIR: &str = "LLVM_TOOLS_BINARY_DIR";
pub const ENV_LIBCLC_INC: &str = "LIBCLC_INC";
pub const ENV_LIBCLC_LIB: &str = "LIBCLC_LIB";
pub const ENV_CUDA_INC: &str = "CUDA_INC";
pub const ENV_CUDA_LIB: &str = "CUDA_LIB";
pub const ENV_DATABASE: &str = "ALLEYCAT_DB";

pub const DEFAULT_DEVICE_TARGET: &str = "nvptx64--nvidiacl";

/// Complete driver configuration, immutable once the run starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// BSP (device) pipeline inputs, output and search paths
    pub device: PipelineConfig,
    /// Host pipeline inputs, output and search paths
    pub host: PipelineConfig,
    /// Toolchain locations and fixed include/library paths
    pub toolchain: ToolchainConfig,
    /// Stage truncation and emission flags
    pub stages: StageOptions,
    /// Analysis database shared by the analyze and transform stages
    pub database: Option<PathBuf>,
    /// Print commands instead of running them
    pub dry_run: bool,
    /// Verbosity count (`-v`, `-vv`, ...)
    pub verbose: u8,
    /// Directory for temporary artifacts (defaults to the OS temp dir)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
    /// Library names linked as `-l<name>` (host only)
    pub libraries: Vec<String>,
}

impl PipelineConfig {
    pub fn is_active(&self) -> bool {
        !self.inputs.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Directory holding clang, opt, llvm-link, ...
    pub root: Option<PathBuf>,
    /// Target triple for the BSP pipeline
    pub device_target: String,
    pub libclc_include: Option<PathBuf>,
    pub libclc_lib: Option<PathBuf>,
    pub cuda_include: Option<PathBuf>,
    pub cuda_lib: Option<PathBuf>,
    /// Directory holding `alleycat.h` and its dependencies
    pub support_include: PathBuf,
    /// Directory holding the analysis/transform pass plugins
    pub plugin_dir: PathBuf,
    /// Directory holding the host runtime libraries (jsoncpp, bitop)
    pub runtime_lib_dir: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            root: None,
            device_target: DEFAULT_DEVICE_TARGET.to_string(),
            libclc_include: None,
            libclc_lib: None,
            cuda_include: None,
            cuda_lib: None,
            support_include: PathBuf::from("./inc"),
            plugin_dir: PathBuf::from("./lib"),
            runtime_lib_dir: PathBuf::from("./lib"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOptions {
    /// Only run the compile stage (`-S`)
    pub only_compile: bool,
    /// Stop after compile/analyze/transform (`-c`)
    pub compile_analyze_transform_only: bool,
    pub analyze: bool,
    pub transform: bool,
    /// Emit textual intermediate form instead of bitcode
    pub emit_intermediate: bool,
    /// Allow the assemble and disassemble stages to run
    pub backend_stages: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            only_compile: false,
            compile_analyze_transform_only: false,
            analyze: true,
            transform: true,
            emit_intermediate: false,
            backend_stages: false,
        }
    }
}

impl DriverConfig {
    pub fn pipeline(&self, kind: PipelineKind) -> &PipelineConfig {
        match kind {
            PipelineKind::Device => &self.device,
            PipelineKind::Host => &self.host,
        }
    }

    /// Apply the environment layer, reading variables through `lookup`.
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(dir) = get(ENV_TOOLS_DIR) {
            self.toolchain.root = Some(PathBuf::from(dir));
        }
        if let Some(path) = get(ENV_LIBCLC_INC) {
            self.toolchain.libclc_include = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_LIBCLC_LIB) {
            self.toolchain.libclc_lib = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_CUDA_INC) {
            self.toolchain.cuda_include = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_CUDA_LIB) {
            self.toolchain.cuda_lib = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_DATABASE) {
            self.database = Some(PathBuf::from(path));
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }
}
