//! Shared fixture: an eight-stage pipeline over a temp directory and a
//! scripted runner that writes each stage's outputs instead of spawning.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use smartrun_core::{ArtifactSpec, CommandSpec, MetricSpec, Pipeline, Stage, StageId};
use smartrun_runner::{ExecError, ExecutionResult, RunContext, StageRunner};

pub const FEATURES_HEADER: &str = "open,close,volume,vol_regime";

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub pipeline: Pipeline,
    pub ctx: RunContext,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("data")).unwrap();
        fs::create_dir_all(root.join("models")).unwrap();

        let data = |name: &str| ArtifactSpec::new(root.join("data").join(name));
        let model = |name: &str| ArtifactSpec::new(root.join("models").join(name));
        let cmd = |id: StageId| CommandSpec::new(format!("./{}.sh", id.name()));

        let stages = vec![
            Stage::new(StageId::Download, cmd(StageId::Download)).output(data("raw.csv")),
            Stage::new(StageId::Merge, cmd(StageId::Merge))
                .input(data("raw.csv"))
                .output(data("data.csv")),
            Stage::new(StageId::Features, cmd(StageId::Features))
                .input(data("data.csv"))
                .output(data("features.csv").with_columns(["vol_regime"])),
            Stage::new(StageId::Labels, cmd(StageId::Labels))
                .input(data("features.csv"))
                .output(data("matrix_1h.csv")),
            Stage::new(StageId::Train, cmd(StageId::Train))
                .input(data("matrix_1h.csv"))
                .output(model("trend_1h.model")),
            Stage::new(StageId::Predict, cmd(StageId::Predict))
                .input(model("trend_1h.model"))
                .input(data("matrix_1h.csv"))
                .output(data("predictions_1h.csv"))
                .output(model("prediction-metrics.txt")),
            Stage::new(StageId::Signals, cmd(StageId::Signals))
                .input(data("predictions_1h.csv"))
                .output(data("signals_1h.csv"))
                .with_metrics(MetricSpec::SignalBalance {
                    column: "signal".into(),
                    buy: "1".into(),
                    sell: "-1".into(),
                    threshold: 0.30,
                }),
            Stage::new(StageId::Backtest, cmd(StageId::Backtest))
                .input(data("signals_1h.csv"))
                .output(data("backtest_1h.csv")),
        ];

        let ctx = RunContext {
            profile: "test".into(),
            workdir: root.to_path_buf(),
            data_dir: root.join("data"),
            model_dir: root.join("models"),
            tail_lines: 5,
        };

        Self {
            pipeline: Pipeline::new(stages).unwrap(),
            ctx,
            dir,
        }
    }

    pub fn data(&self, name: &str) -> PathBuf {
        self.dir.path().join("data").join(name)
    }

    pub fn primary_output(&self, id: StageId) -> PathBuf {
        self.pipeline.get(id).unwrap().outputs[0].path.clone()
    }

    /// BLAKE3 over every file path and its contents, in sorted order.
    pub fn digest(&self) -> String {
        let mut files = Vec::new();
        collect_files(self.dir.path(), &mut files);
        files.sort();

        let mut hasher = blake3::Hasher::new();
        for file in files {
            hasher.update(file.to_string_lossy().as_bytes());
            hasher.update(&fs::read(&file).unwrap());
        }
        hasher.finalize().to_hex().to_string()
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// Writes every declared output with plausible content and exits zero,
/// unless told to fail or to produce nothing for a stage.
pub struct ScriptedRunner {
    pub fail_at: Option<StageId>,
    pub write_nothing_at: Option<StageId>,
    pub buy: usize,
    pub sell: usize,
    pub calls: RefCell<Vec<StageId>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            fail_at: None,
            write_nothing_at: None,
            buy: 10,
            sell: 9,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn failing_at(stage: StageId) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::new()
        }
    }

    pub fn with_signals(buy: usize, sell: usize) -> Self {
        Self {
            buy,
            sell,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<StageId> {
        self.calls.borrow().clone()
    }

    pub fn reset(&self) {
        self.calls.borrow_mut().clear();
    }

    fn contents(&self, path: &Path) -> String {
        let name = path.file_name().unwrap().to_string_lossy();
        if name.starts_with("features") {
            format!("{FEATURES_HEADER}\n1.0,1.1,100,low\n")
        } else if name.starts_with("signals") {
            let mut body = String::from("ts,signal\n");
            for i in 0..self.buy {
                body.push_str(&format!("{i},1\n"));
            }
            for i in 0..self.sell {
                body.push_str(&format!("{i},-1\n"));
            }
            body
        } else {
            "ts,value\n1,2\n".to_string()
        }
    }
}

impl StageRunner for ScriptedRunner {
    fn run(&self, stage: &Stage, _ctx: &RunContext) -> Result<ExecutionResult, ExecError> {
        self.calls.borrow_mut().push(stage.id);

        if self.fail_at == Some(stage.id) {
            return Ok(ExecutionResult {
                exit_code: Some(1),
                duration: Duration::from_millis(3),
                stdout_tail: vec![],
                stderr_tail: vec![format!("{} exploded", stage.name())],
            });
        }

        if self.write_nothing_at != Some(stage.id) {
            for output in &stage.outputs {
                fs::write(&output.path, self.contents(&output.path)).unwrap();
            }
        }

        Ok(ExecutionResult {
            exit_code: Some(0),
            duration: Duration::from_millis(3),
            stdout_tail: vec![format!("{} done", stage.name())],
            stderr_tail: vec![],
        })
    }
}
