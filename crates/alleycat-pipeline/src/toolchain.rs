use crate::config::ToolchainConfig;
use std::path::{Path, PathBuf};

/// Resolved locations of the external tools the stages invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub clang: PathBuf,
    pub clangxx: PathBuf,
    pub opt: PathBuf,
    pub llvm_link: PathBuf,
    pub llvm_dis: PathBuf,
    pub cp: PathBuf,
}

impl Toolchain {
    /// LLVM tools are taken from the configured root, or looked up on `PATH`
    /// when no root is set. Unresolvable tools keep their bare name and fail
    /// at spawn time.
    pub fn locate(config: &ToolchainConfig) -> Self {
        let llvm = |name: &str| match config.root.as_deref() {
            Some(root) => root.join(name),
            None => search_path(name),
        };
        Self {
            clang: llvm("clang"),
            clangxx: llvm("clang++"),
            opt: llvm("opt"),
            llvm_link: llvm("llvm-link"),
            llvm_dis: llvm("llvm-dis"),
            cp: search_path("cp"),
        }
    }

    pub fn in_dir(root: &Path) -> Self {
        Self::locate(&ToolchainConfig {
            root: Some(root.to_path_buf()),
            ..ToolchainConfig::default()
        })
    }
}

fn search_path(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_prefixes_llvm_tools() {
        let toolchain = Toolchain::in_dir(Path::new("/opt/llvm/bin"));
        assert_eq!(toolchain.clang, PathBuf::from("/opt/llvm/bin/clang"));
        assert_eq!(toolchain.clangxx, PathBuf::from("/opt/llvm/bin/clang++"));
        assert_eq!(toolchain.llvm_link, PathBuf::from("/opt/llvm/bin/llvm-link"));
        assert!(!toolchain.cp.starts_with("/opt/llvm/bin"));
    }

    #[test]
    fn missing_tools_keep_bare_name() {
        assert_eq!(
            search_path("alleycat-no-such-tool"),
            PathBuf::from("alleycat-no-such-tool")
        );
    }
}
