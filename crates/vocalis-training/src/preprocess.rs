use crate::params::HyperparameterSet;
use crate::stage::TrainingVariant;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Worker processes used by preprocessing.
pub const PREPROCESS_NUM_PROCESSES: u32 = 2;
/// Validation examples held out per language.
pub const PREPROCESS_VAL_PER_LANG: u32 = 0;
pub const PREPROCESS_LOG_INTERVAL: u32 = 200;

/// Everything the preprocessing step needs for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessRequest {
    pub model_name: String,
    pub batch_size: u32,
    pub epochs: u32,
    pub save_every_steps: u64,
    pub num_processes: u32,
    pub normalize: bool,
    pub trim: bool,
    pub freeze_en_bert: bool,
    pub freeze_jp_bert: bool,
    pub freeze_zh_bert: bool,
    pub freeze_style: bool,
    pub use_extra_features: bool,
    pub val_per_lang: u32,
    pub log_interval: u32,
}

impl PreprocessRequest {
    #[must_use]
    pub fn for_unit(unit: &str, params: &HyperparameterSet) -> Self {
        Self {
            model_name: unit.to_string(),
            batch_size: params.batch_size,
            epochs: params.epochs,
            save_every_steps: params.save_every_steps,
            num_processes: PREPROCESS_NUM_PROCESSES,
            normalize: params.normalize,
            trim: params.trim,
            freeze_en_bert: false,
            freeze_jp_bert: false,
            freeze_zh_bert: false,
            freeze_style: false,
            use_extra_features: params.use_extra_features,
            val_per_lang: PREPROCESS_VAL_PER_LANG,
            log_interval: PREPROCESS_LOG_INTERVAL,
        }
    }

    #[must_use]
    pub fn training_variant(&self) -> TrainingVariant {
        TrainingVariant::select(self.use_extra_features)
    }

    /// Command-line rendering, one `--flag value` pair per field.
    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let pairs: [(&str, String); 14] = [
            ("--model_name", self.model_name.clone()),
            ("--batch_size", self.batch_size.to_string()),
            ("--epochs", self.epochs.to_string()),
            ("--save_every_steps", self.save_every_steps.to_string()),
            ("--num_processes", self.num_processes.to_string()),
            ("--normalize", self.normalize.to_string()),
            ("--trim", self.trim.to_string()),
            ("--freeze_en_bert", self.freeze_en_bert.to_string()),
            ("--freeze_jp_bert", self.freeze_jp_bert.to_string()),
            ("--freeze_zh_bert", self.freeze_zh_bert.to_string()),
            ("--freeze_style", self.freeze_style.to_string()),
            ("--use_extra_features", self.use_extra_features.to_string()),
            ("--val_per_lang", self.val_per_lang.to_string()),
            ("--log_interval", self.log_interval.to_string()),
        ];
        pairs
            .into_iter()
            .flat_map(|(flag, value)| [OsString::from(flag), OsString::from(value)])
            .collect()
    }
}

/// `(success, message)` pair returned by preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessOutcome {
    pub success: bool,
    pub message: String,
}

impl PreprocessOutcome {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn preprocess(&self, request: &PreprocessRequest) -> PreprocessOutcome;
}

/// Preprocessor backed by the dataset toolkit's preprocessing entry point.
///
/// The last non-empty line written to stderr becomes the failure message.
#[derive(Debug, Clone)]
pub struct CommandPreprocessor {
    interpreter: PathBuf,
    script: PathBuf,
    workdir: PathBuf,
}

impl CommandPreprocessor {
    #[must_use]
    pub fn new(interpreter: PathBuf, script: PathBuf, workdir: PathBuf) -> Self {
        Self { interpreter, script, workdir }
    }
}

#[async_trait]
impl Preprocessor for CommandPreprocessor {
    async fn preprocess(&self, request: &PreprocessRequest) -> PreprocessOutcome {
        debug!(unit = %request.model_name, script = %self.script.display(), "launching preprocessing");

        let spawned = Command::new(&self.interpreter)
            .arg(&self.script)
            .args(request.to_args())
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return PreprocessOutcome::failure(format!(
                    "failed to launch {} {}: {e}",
                    self.interpreter.display(),
                    self.script.display()
                ));
            }
        };

        // Stream stderr while the step runs; only the last line is kept.
        let mut last_line = None;
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!(unit = %request.model_name, "preprocess: {line}");
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            last_line = Some(trimmed.to_string());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(unit = %request.model_name, "stopped reading preprocess stderr: {e}");
                        break;
                    }
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => return PreprocessOutcome::failure(format!("failed to wait for preprocessing: {e}")),
        };

        if status.success() {
            PreprocessOutcome::success(last_line.unwrap_or_else(|| "Success: All preprocess finished!".to_string()))
        } else {
            let code = status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
            PreprocessOutcome::failure(last_line.unwrap_or_else(|| format!("preprocessing exited with status {code}")))
        }
    }
}
