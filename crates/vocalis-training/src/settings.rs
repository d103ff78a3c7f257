//! Orchestrator settings.
//!
//! Settings describe how stages are launched and where the shared files
//! live; training hyperparameters come from the input directory instead.
//!
//! Precedence (highest first):
//! 1. File passed explicitly (`--config`)
//! 2. Local file (`./vocalis.toml`)
//! 3. Global file (`~/.vocalis/config.toml`)
//! 4. Defaults

use crate::error::{PipelineError, PipelineResult};
use crate::preprocess::CommandPreprocessor;
use crate::stage::{ProcessStageRunner, StageScripts};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What happens to the rest of the run when a unit fails.
///
/// Preprocessing failures abort the run under either policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failing unit.
    #[default]
    FailFast,
    /// Mark the unit failed and continue with the next one.
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Working directory of every stage; relative paths below resolve against it.
    ///
    /// Loaded settings always carry an absolute workdir, since stage processes
    /// run inside it and receive paths built from it.
    pub workdir: PathBuf,
    pub interpreter: PathBuf,
    pub stages: StageScripts,
    pub dataset_root: PathBuf,
    pub baseline_config: PathBuf,
    /// Shared slot the training stage reads its config from.
    pub stage_config: PathBuf,
    pub failure_policy: FailurePolicy,
    pub log_level: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            interpreter: PathBuf::from("python"),
            stages: StageScripts::default(),
            dataset_root: PathBuf::from("Data"),
            baseline_config: PathBuf::from("default_config.yml"),
            stage_config: PathBuf::from("config.yml"),
            failure_policy: FailurePolicy::default(),
            log_level: None,
        }
    }
}

/// On-disk form: every field optional so files can be layered.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    workdir: Option<PathBuf>,
    interpreter: Option<PathBuf>,
    stages: StagesFile,
    dataset_root: Option<PathBuf>,
    baseline_config: Option<PathBuf>,
    stage_config: Option<PathBuf>,
    failure_policy: Option<FailurePolicy>,
    log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StagesFile {
    segment: Option<PathBuf>,
    transcribe: Option<PathBuf>,
    preprocess: Option<PathBuf>,
    train: Option<PathBuf>,
    train_extra: Option<PathBuf>,
}

fn merge_opt<T: Clone>(target: &mut T, value: Option<&T>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

impl PipelineSettings {
    /// Load settings from `explicit` if given, otherwise discover them.
    pub fn load(explicit: Option<&Path>) -> PipelineResult<Self> {
        if let Some(path) = explicit {
            let mut settings = Self::default();
            settings.merge(&read_settings_file(path)?);
            return settings.with_absolute_workdir();
        }
        Self::discover_and_load(&Self::default_global_path(), &Self::default_local_path())
    }

    pub fn discover_and_load(global: &Path, local: &Path) -> PipelineResult<Self> {
        let mut settings = Self::default();
        for path in [global, local] {
            if path.is_file() {
                debug!(path = %path.display(), "loading settings");
                settings.merge(&read_settings_file(path)?);
            }
        }
        settings.with_absolute_workdir()
    }

    /// Anchor a relative workdir at the current directory.
    pub fn with_absolute_workdir(mut self) -> PipelineResult<Self> {
        self.workdir = std::path::absolute(&self.workdir)
            .map_err(|e| PipelineError::Settings(format!("workdir {}: {e}", self.workdir.display())))?;
        Ok(self)
    }

    #[must_use]
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".vocalis")
            .join("config.toml")
    }

    #[must_use]
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("vocalis.toml")
    }

    fn merge(&mut self, file: &SettingsFile) {
        merge_opt(&mut self.workdir, file.workdir.as_ref());
        merge_opt(&mut self.interpreter, file.interpreter.as_ref());
        merge_opt(&mut self.dataset_root, file.dataset_root.as_ref());
        merge_opt(&mut self.baseline_config, file.baseline_config.as_ref());
        merge_opt(&mut self.stage_config, file.stage_config.as_ref());
        merge_opt(&mut self.failure_policy, file.failure_policy.as_ref());
        if file.log_level.is_some() {
            self.log_level.clone_from(&file.log_level);
        }

        let stages = &file.stages;
        merge_opt(&mut self.stages.segment, stages.segment.as_ref());
        merge_opt(&mut self.stages.transcribe, stages.transcribe.as_ref());
        merge_opt(&mut self.stages.preprocess, stages.preprocess.as_ref());
        merge_opt(&mut self.stages.train, stages.train.as_ref());
        merge_opt(&mut self.stages.train_extra, stages.train_extra.as_ref());
    }

    /// Resolve a settings path against the working directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.workdir.join(path)
    }

    #[must_use]
    pub fn dataset_root_path(&self) -> PathBuf {
        self.resolve(&self.dataset_root)
    }

    #[must_use]
    pub fn baseline_config_path(&self) -> PathBuf {
        self.resolve(&self.baseline_config)
    }

    #[must_use]
    pub fn stage_config_path(&self) -> PathBuf {
        self.resolve(&self.stage_config)
    }

    #[must_use]
    pub fn stage_runner(&self) -> ProcessStageRunner {
        ProcessStageRunner::new(self.interpreter.clone(), self.stages.clone(), self.workdir.clone())
    }

    #[must_use]
    pub fn preprocessor(&self) -> CommandPreprocessor {
        CommandPreprocessor::new(self.interpreter.clone(), self.stages.preprocess.clone(), self.workdir.clone())
    }
}

fn read_settings_file(path: &Path) -> PipelineResult<SettingsFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Settings(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&content).map_err(|e| PipelineError::Settings(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.interpreter, PathBuf::from("python"));
        assert_eq!(settings.failure_policy, FailurePolicy::FailFast);
        assert_eq!(settings.stage_config_path(), PathBuf::from("./config.yml"));
    }

    #[test]
    fn test_local_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global.toml");
        let local = temp.path().join("local.toml");
        std::fs::write(&global, "interpreter = \"python3\"\nfailure_policy = \"isolate\"\n[stages]\nsegment = \"seg.py\"\n")
            .unwrap();
        std::fs::write(&local, "interpreter = \"/opt/venv/bin/python\"\n").unwrap();

        let settings = PipelineSettings::discover_and_load(&global, &local).unwrap();
        assert_eq!(settings.interpreter, PathBuf::from("/opt/venv/bin/python"));
        assert_eq!(settings.failure_policy, FailurePolicy::Isolate);
        assert_eq!(settings.stages.segment, PathBuf::from("seg.py"));
        assert_eq!(settings.stages.transcribe, PathBuf::from("transcribe.py"));
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let settings =
            PipelineSettings::discover_and_load(&temp.path().join("a.toml"), &temp.path().join("b.toml")).unwrap();
        assert_eq!(settings.workdir, std::env::current_dir().unwrap());
        assert_eq!(PipelineSettings { workdir: PathBuf::from("."), ..settings }, PipelineSettings::default());
    }

    #[test]
    fn test_relative_workdir_is_made_absolute() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vocalis.toml");
        std::fs::write(&path, "workdir = \"work\"\n").unwrap();

        let settings = PipelineSettings::load(Some(&path)).unwrap();
        let expected = std::env::current_dir().unwrap().join("work");
        assert!(settings.workdir.is_absolute());
        assert_eq!(settings.workdir, expected);
        assert_eq!(settings.dataset_root_path(), expected.join("Data"));
        assert_eq!(settings.stage_config_path(), expected.join("config.yml"));
    }

    #[test]
    fn test_explicit_file_errors() {
        let temp = TempDir::new().unwrap();
        assert!(PipelineSettings::load(Some(&temp.path().join("missing.toml"))).is_err());

        let bad = temp.path().join("bad.toml");
        std::fs::write(&bad, "no_such_field = 1\n").unwrap();
        assert!(matches!(PipelineSettings::load(Some(&bad)), Err(PipelineError::Settings(_))));
    }

    #[test]
    fn test_paths_resolve_against_workdir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vocalis.toml");
        std::fs::write(&path, format!("workdir = {:?}\nstage_config = \"/abs/config.yml\"\n", temp.path())).unwrap();

        let settings = PipelineSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.baseline_config_path(), temp.path().join("default_config.yml"));
        assert_eq!(settings.dataset_root_path(), temp.path().join("Data"));
        assert_eq!(settings.stage_config_path(), PathBuf::from("/abs/config.yml"));
    }
}
