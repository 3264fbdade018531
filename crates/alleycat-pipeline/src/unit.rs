//! Per-file artifact tracking.

use crate::action::ActionId;
use crate::error::{PipelineError, Result};
use crate::temp::TempArena;
use std::path::{Path, PathBuf};

/// Serialized form of an artifact, recognized by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// OpenCL C kernel source (`.cl`)
    OpenCl,
    /// C++ host source (`.cc`, `.cpp`)
    CxxSource,
    /// Textual IR (`.ll`)
    IrText,
    /// IR bitcode (`.bc`)
    IrBinary,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "cl" => Some(InputFormat::OpenCl),
            "cc" | "cpp" => Some(InputFormat::CxxSource),
            "ll" => Some(InputFormat::IrText),
            "bc" => Some(InputFormat::IrBinary),
            _ => None,
        }
    }

    /// Extension used for temporaries carrying this form, including the dot.
    pub fn extension(self) -> &'static str {
        match self {
            InputFormat::OpenCl => ".cl",
            InputFormat::CxxSource => ".cc",
            InputFormat::IrText => ".ll",
            InputFormat::IrBinary => ".bc",
        }
    }
}

/// One translation artifact threaded through the stages of a pipeline.
///
/// The cursor is `previous` (input of the latest action) and `current`
/// (its output); `history` keeps every artifact ever assigned.
#[derive(Debug, Clone)]
pub struct Unit {
    source: Option<PathBuf>,
    name: String,
    previous: Option<PathBuf>,
    current: Option<PathBuf>,
    history: Vec<PathBuf>,
    actions: Vec<ActionId>,
}

impl Unit {
    pub fn from_source(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let name = stem_of(&source);
        Self {
            source: Some(source),
            name,
            previous: None,
            current: None,
            history: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Synthetic unit carrying the merged artifact of a pipeline; named
    /// after the pipeline's final output.
    pub fn combined(output: &Path) -> Self {
        Self {
            source: None,
            name: stem_of(output),
            previous: None,
            current: None,
            history: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_combined(&self) -> bool {
        self.source.is_none()
    }

    pub fn history(&self) -> &[PathBuf] {
        &self.history
    }

    pub fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    /// Input of the most recent action: the previous artifact, or the
    /// original file before the second artifact is recorded.
    pub fn current_input(&self) -> Result<&Path> {
        self.previous
            .as_deref()
            .or(self.source.as_deref())
            .ok_or_else(|| PipelineError::NoInputAssigned {
                unit: self.name.clone(),
            })
    }

    pub fn current_output(&self) -> Result<&Path> {
        self.current
            .as_deref()
            .ok_or_else(|| PipelineError::NoOutputAssigned {
                unit: self.name.clone(),
            })
    }

    pub fn current_input_format(&self) -> Result<Option<InputFormat>> {
        Ok(InputFormat::from_path(self.current_input()?))
    }

    /// The artifact the next action will consume, i.e. what becomes the
    /// current input once another output is appended.
    pub fn next_input(&self) -> Option<&Path> {
        self.current.as_deref().or(self.source.as_deref())
    }

    pub fn append_final_output(&mut self, path: &Path) -> &Path {
        self.advance(path.to_path_buf())
    }

    pub fn append_temporary_output(&mut self, arena: &mut TempArena, extension: &str) -> Result<&Path> {
        let path = arena.allocate(&self.name, extension)?;
        Ok(self.advance(path))
    }

    pub(crate) fn record_action(&mut self, id: ActionId) {
        self.actions.push(id);
    }

    fn advance(&mut self, path: PathBuf) -> &Path {
        self.history.push(path.clone());
        self.previous = self.current.take();
        self.current.insert(path).as_path()
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
