//! End-to-end driver runs against stand-in toolchain scripts.
#![cfg(unix)]

use alleycat_pipeline::{Driver, DriverConfig, PipelineError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

// Writing an executable while another test forks can fail with ETXTBSY.
static TOOLCHAIN_LOCK: Mutex<()> = Mutex::new(());

const WRITES_OUTPUT: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then
        out="$2"
        shift
    fi
    shift
done
if [ -n "$out" ]; then
    echo "$(basename "$0")" > "$out"
fi
exit 0
"#;

const FAILS: &str = "#!/bin/sh\nexit 1\n";

struct Workspace {
    _root: TempDir,
    tools: PathBuf,
    temp: PathBuf,
    work: PathBuf,
}

impl Workspace {
    fn new(failing: &[&str]) -> Self {
        let root = TempDir::new().unwrap();
        let tools = root.path().join("bin");
        let temp = root.path().join("tmp");
        let work = root.path().join("work");
        for dir in [&tools, &temp, &work] {
            fs::create_dir(dir).unwrap();
        }
        for tool in ["clang", "clang++", "opt", "llvm-link", "llvm-dis"] {
            let body = if failing.contains(&tool) { FAILS } else { WRITES_OUTPUT };
            let path = tools.join(tool);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        Self {
            _root: root,
            tools,
            temp,
            work,
        }
    }

    fn config(&self) -> DriverConfig {
        let mut config = DriverConfig::default();
        config.toolchain.root = Some(self.tools.clone());
        config.temp_dir = Some(self.temp.clone());
        config.database = Some(self.work.join("ac.db"));
        config
    }

    fn input(&self, name: &str) -> PathBuf {
        let path = self.work.join(name);
        fs::write(&path, "source").unwrap();
        path
    }

    fn leftover_temporaries(&self) -> usize {
        fs::read_dir(&self.temp).unwrap().count()
    }
}

fn written_by(path: &Path) -> String {
    fs::read_to_string(path).unwrap().trim().to_string()
}

#[tokio::test]
async fn device_pipeline_writes_linked_output() {
    let _guard = TOOLCHAIN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let ws = Workspace::new(&[]);
    let mut config = ws.config();
    config.device.inputs = vec![ws.input("a.cl"), ws.input("b.cl")];
    let output = ws.work.join("kernels.bc");
    config.device.output = Some(output.clone());

    let summary = Driver::new(config).run().await.unwrap();
    assert_eq!(summary.report.completed, 7);
    assert_eq!(written_by(&output), "llvm-link");
    assert_eq!(summary.removed_temporaries, 6);
    assert_eq!(ws.leftover_temporaries(), 0);
}

#[tokio::test]
async fn host_pipeline_copies_through_analysis() {
    let _guard = TOOLCHAIN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let ws = Workspace::new(&[]);
    let mut config = ws.config();
    config.host.inputs = vec![ws.input("main.cpp")];
    let output = ws.work.join("main.bc");
    config.host.output = Some(output.clone());
    config.stages.compile_analyze_transform_only = true;

    let summary = Driver::new(config).run().await.unwrap();
    assert_eq!(summary.report.completed, 3);
    assert_eq!(written_by(&output), "opt");
    assert_eq!(ws.leftover_temporaries(), 0);
}

#[tokio::test]
async fn single_stage_run_allocates_nothing() {
    let _guard = TOOLCHAIN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let ws = Workspace::new(&[]);
    let mut config = ws.config();
    config.database = None;
    config.device.inputs = vec![ws.input("k.cl")];
    let output = ws.work.join("k.bc");
    config.device.output = Some(output.clone());
    config.stages.only_compile = true;

    let summary = Driver::new(config).run().await.unwrap();
    assert_eq!(summary.report.completed, 1);
    assert_eq!(summary.removed_temporaries, 0);
    assert_eq!(written_by(&output), "clang");
}

#[tokio::test]
async fn failing_tool_aborts_and_cleans_up() {
    let _guard = TOOLCHAIN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let ws = Workspace::new(&["opt"]);
    let mut config = ws.config();
    config.device.inputs = vec![ws.input("k.cl")];
    let output = ws.work.join("k.bc");
    config.device.output = Some(output.clone());

    let err = Driver::new(config).run().await.unwrap_err();
    match err {
        PipelineError::SubcommandFailed { kind, command } => {
            assert_eq!(kind, "bsp-analyze");
            assert!(command.contains("bsp_analysis.so"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
    assert_eq!(ws.leftover_temporaries(), 0);
}

#[tokio::test]
async fn missing_tool_reports_spawn_failure() {
    let _guard = TOOLCHAIN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let ws = Workspace::new(&[]);
    let mut config = ws.config();
    config.toolchain.root = Some(ws.work.join("no-such-dir"));
    config.device.inputs = vec![ws.input("k.cl")];
    config.device.output = Some(ws.work.join("k.bc"));

    let err = Driver::new(config).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Spawn { .. }));
    assert_eq!(ws.leftover_temporaries(), 0);
}
