//! Configuration file layer

use crate::{CliError, Result};
use alleycat_pipeline::{DriverConfig, PipelineConfig, StageOptions, ToolchainConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const LOCAL_CONFIG: &str = "alleycat.toml";

/// Settings read from `alleycat.toml`. Input and output files only come
/// from the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Toolchain locations
    pub toolchain: ToolchainConfig,

    /// Default stage selection
    pub stages: StageOptions,

    /// BSP search paths
    pub bsp: SearchPaths,

    /// Host search paths and libraries
    pub host: SearchPaths,

    /// Analysis database
    pub database: Option<PathBuf>,

    /// Directory for temporary artifacts
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPaths {
    pub include_dirs: Vec<PathBuf>,
    pub library_dirs: Vec<PathBuf>,
    pub libraries: Vec<String>,
}

impl SearchPaths {
    fn into_pipeline(self) -> PipelineConfig {
        PipelineConfig {
            include_dirs: self.include_dirs,
            library_dirs: self.library_dirs,
            libraries: self.libraries,
            ..PipelineConfig::default()
        }
    }
}

impl CliConfig {
    /// Load `config_path`, or the first config file found in the standard
    /// locations, or the defaults when there is none.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }
        match Self::candidate_paths().into_iter().find(|path| path.is_file()) {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Working directory, then home directory, then the user config dir.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".alleycat.toml"));
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("alleycat").join("config.toml"));
        }
        paths
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Start of the driver configuration; environment and command line are
    /// applied on top.
    pub fn into_driver_config(self) -> DriverConfig {
        DriverConfig {
            device: self.bsp.into_pipeline(),
            host: self.host.into_pipeline(),
            toolchain: self.toolchain,
            stages: self.stages,
            database: self.database,
            temp_dir: self.temp_dir,
            ..DriverConfig::default()
        }
    }
}
