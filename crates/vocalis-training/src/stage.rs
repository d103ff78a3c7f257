//! External processing stages.
//!
//! Segmenting, transcribing and training are opaque executables. Each call is
//! described by a [`StageInvocation`] and executed by a [`StageRunner`]; the
//! orchestrator only sees the resulting [`StageResult`].

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Precision passed to the transcribing stage.
pub const TRANSCRIBE_COMPUTE_TYPE: &str = "float16";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Segment,
    Transcribe,
    Preprocess,
    Train,
}

impl StageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Segment => "segmenting",
            Self::Transcribe => "transcribing",
            Self::Preprocess => "preprocessing",
            Self::Train => "training",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which training entry point to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingVariant {
    Standard,
    ExtraFeatures,
}

impl TrainingVariant {
    #[must_use]
    pub fn select(use_extra_features: bool) -> Self {
        if use_extra_features { Self::ExtraFeatures } else { Self::Standard }
    }
}

/// One call of an external stage with its fixed argument contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub kind: StageKind,
    /// Set only for [`StageKind::Train`].
    pub variant: Option<TrainingVariant>,
    pub args: Vec<OsString>,
}

impl StageInvocation {
    #[must_use]
    pub fn segment(unit_dir: &Path, raw_audio_path: &Path) -> Self {
        Self {
            kind: StageKind::Segment,
            variant: None,
            args: flags([("--input_dir", unit_dir.as_os_str()), ("--output_dir", raw_audio_path.as_os_str())]),
        }
    }

    #[must_use]
    pub fn transcribe(raw_audio_path: &Path, label_path: &Path, speaker_name: &str) -> Self {
        Self {
            kind: StageKind::Transcribe,
            variant: None,
            args: flags([
                ("--input_dir", raw_audio_path.as_os_str()),
                ("--output_file", label_path.as_os_str()),
                ("--speaker_name", OsStr::new(speaker_name)),
                ("--compute_type", OsStr::new(TRANSCRIBE_COMPUTE_TYPE)),
            ]),
        }
    }

    #[must_use]
    pub fn train(variant: TrainingVariant, config_path: &Path, dataset_path: &Path, assets_root: &Path) -> Self {
        Self {
            kind: StageKind::Train,
            variant: Some(variant),
            args: flags([
                ("--config", config_path.as_os_str()),
                ("--model", dataset_path.as_os_str()),
                ("--assets_root", assets_root.as_os_str()),
            ]),
        }
    }

    /// Value following `flag`, if present.
    #[must_use]
    pub fn arg(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }
}

fn flags<const N: usize>(pairs: [(&str, &OsStr); N]) -> Vec<OsString> {
    pairs
        .into_iter()
        .flat_map(|(flag, value)| [OsString::from(flag), value.to_os_string()])
        .collect()
}

/// Outcome of one stage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub success: bool,
    pub message: Option<String>,
}

impl StageResult {
    #[must_use]
    pub fn ok() -> Self {
        Self { success: true, message: None }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()) }
    }

    /// Convert into a [`PipelineError::StageFailure`] attributed to `unit`.
    pub fn into_result(self, unit: &str, stage: StageKind) -> PipelineResult<()> {
        if self.success {
            return Ok(());
        }
        Err(PipelineError::StageFailure {
            unit: unit.to_string(),
            stage,
            message: self.message.unwrap_or_else(|| "stage reported failure".to_string()),
        })
    }
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run the stage to completion. No retries and no timeout.
    async fn run(&self, invocation: &StageInvocation) -> StageResult;
}

/// Scripts launched for each external stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageScripts {
    pub segment: PathBuf,
    pub transcribe: PathBuf,
    pub preprocess: PathBuf,
    pub train: PathBuf,
    pub train_extra: PathBuf,
}

impl Default for StageScripts {
    fn default() -> Self {
        Self {
            segment: PathBuf::from("slice.py"),
            transcribe: PathBuf::from("transcribe.py"),
            preprocess: PathBuf::from("preprocess_all.py"),
            train: PathBuf::from("train_ms.py"),
            train_extra: PathBuf::from("train_ms_jp_extra.py"),
        }
    }
}

impl StageScripts {
    #[must_use]
    pub fn script_for(&self, invocation: &StageInvocation) -> &Path {
        match (invocation.kind, invocation.variant) {
            (StageKind::Segment, _) => &self.segment,
            (StageKind::Transcribe, _) => &self.transcribe,
            (StageKind::Preprocess, _) => &self.preprocess,
            (StageKind::Train, Some(TrainingVariant::ExtraFeatures)) => &self.train_extra,
            (StageKind::Train, _) => &self.train,
        }
    }
}

/// Runs stages as child processes of `interpreter <script> <args...>`.
#[derive(Debug, Clone)]
pub struct ProcessStageRunner {
    interpreter: PathBuf,
    scripts: StageScripts,
    workdir: PathBuf,
}

impl ProcessStageRunner {
    #[must_use]
    pub fn new(interpreter: PathBuf, scripts: StageScripts, workdir: PathBuf) -> Self {
        Self { interpreter, scripts, workdir }
    }

    fn command(&self, invocation: &StageInvocation) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(self.scripts.script_for(invocation))
            .args(&invocation.args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

#[async_trait]
impl StageRunner for ProcessStageRunner {
    async fn run(&self, invocation: &StageInvocation) -> StageResult {
        let script = self.scripts.script_for(invocation);
        debug!(
            stage = %invocation.kind,
            interpreter = %self.interpreter.display(),
            script = %script.display(),
            args = ?invocation.args,
            "launching stage"
        );

        match self.command(invocation).status().await {
            Ok(status) if status.success() => StageResult::ok(),
            Ok(status) => StageResult::failed(match status.code() {
                Some(code) => format!("{} exited with status {code}", script.display()),
                None => format!("{} was terminated by a signal", script.display()),
            }),
            Err(e) => StageResult::failed(format!(
                "failed to launch {} {}: {e}",
                self.interpreter.display(),
                script.display()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_args() {
        let inv = StageInvocation::segment(Path::new("in/data/train/alice"), Path::new("Data/alice/raw"));
        assert_eq!(inv.kind, StageKind::Segment);
        assert_eq!(
            inv.args,
            ["--input_dir", "in/data/train/alice", "--output_dir", "Data/alice/raw"]
                .map(OsString::from)
        );
    }

    #[test]
    fn test_transcribe_args() {
        let inv = StageInvocation::transcribe(Path::new("raw"), Path::new("esd.list"), "alice");
        assert_eq!(inv.arg("--speaker_name"), Some(OsStr::new("alice")));
        assert_eq!(inv.arg("--compute_type"), Some(OsStr::new("float16")));
        assert_eq!(inv.arg("--output_file"), Some(OsStr::new("esd.list")));
        assert_eq!(inv.arg("--missing"), None);
    }

    #[test]
    fn test_training_variant_selects_script() {
        let scripts = StageScripts::default();
        let extra = StageInvocation::train(
            TrainingVariant::select(true),
            Path::new("c.json"),
            Path::new("Data/a"),
            Path::new("models"),
        );
        let plain = StageInvocation::train(
            TrainingVariant::select(false),
            Path::new("c.json"),
            Path::new("Data/a"),
            Path::new("models"),
        );
        assert_eq!(scripts.script_for(&extra), Path::new("train_ms_jp_extra.py"));
        assert_eq!(scripts.script_for(&plain), Path::new("train_ms.py"));
        assert_eq!(plain.arg("--assets_root"), Some(OsStr::new("models")));
    }

    #[test]
    fn test_stage_result_into_result() {
        assert!(StageResult::ok().into_result("alice", StageKind::Segment).is_ok());
        let err = StageResult::failed("exit 1").into_result("bob", StageKind::Segment).unwrap_err();
        assert_eq!(err.unit(), Some("bob"));
        assert!(err.to_string().contains("segmenting"));
        assert!(err.to_string().contains("exit 1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_maps_exit_status() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("ok.sh"), "exit 0\n").unwrap();
        std::fs::write(temp.path().join("fail.sh"), "exit 3\n").unwrap();

        let scripts = StageScripts {
            segment: PathBuf::from("ok.sh"),
            transcribe: PathBuf::from("fail.sh"),
            ..StageScripts::default()
        };
        let runner = ProcessStageRunner::new(PathBuf::from("sh"), scripts, temp.path().to_path_buf());

        let ok = runner.run(&StageInvocation::segment(Path::new("a"), Path::new("b"))).await;
        assert!(ok.success);

        let failed = runner.run(&StageInvocation::transcribe(Path::new("a"), Path::new("b"), "c")).await;
        assert!(!failed.success);
        assert!(failed.message.unwrap().contains("status 3"));
    }

    #[tokio::test]
    async fn test_process_runner_launch_failure() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = ProcessStageRunner::new(
            PathBuf::from("vocalis-no-such-interpreter"),
            StageScripts::default(),
            temp.path().to_path_buf(),
        );
        let result = runner.run(&StageInvocation::segment(Path::new("a"), Path::new("b"))).await;
        assert!(!result.success);
        assert!(result.message.unwrap().contains("failed to launch"));
    }
}
