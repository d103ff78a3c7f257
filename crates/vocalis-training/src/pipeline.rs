//! The pipeline orchestrator.
//!
//! For every training unit, strictly one unit at a time:
//!
//! ```text
//! Preparing -> Segmenting -> Transcribing -> Preprocessing -> Configuring -> Training -> Done
//!     \            \              \                \               \             \
//!      `------------`--------------`----------------`---------------`-------------`--> Failed
//! ```
//!
//! Hyperparameters and the baseline config are resolved once before the first
//! unit starts; a bad value in either aborts the run before any stage runs.
//! The stage config slot is shared by all units, so units must never overlap.

use crate::artifacts::{self, UnitManifest};
use crate::discovery::{discover_units, TrainingUnit};
use crate::error::{PipelineError, PipelineResult};
use crate::layout::UnitLayout;
use crate::params::{load_raw_params, HyperparameterSet};
use crate::preprocess::{PreprocessRequest, Preprocessor};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use crate::settings::{FailurePolicy, PipelineSettings};
use crate::stage::{StageInvocation, StageKind, StageRunner};
use crate::stage_config::{BaselineConfig, ConfigMaterializer, StageConfigSlot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Identifier for one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    /// Creating the unit's dataset directories.
    Preparing,
    Segmenting,
    Transcribing,
    Preprocessing,
    /// Writing the unit's stage config into the shared slot.
    Configuring,
    Training,
    Done,
    Failed,
}

impl UnitState {
    /// Stage executed while in this state.
    #[must_use]
    pub fn stage(self) -> Option<StageKind> {
        match self {
            Self::Segmenting => Some(StageKind::Segment),
            Self::Transcribing => Some(StageKind::Transcribe),
            Self::Preprocessing => Some(StageKind::Preprocess),
            Self::Training => Some(StageKind::Train),
            Self::Pending | Self::Preparing | Self::Configuring | Self::Done | Self::Failed => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Segmenting => "segmenting",
            Self::Transcribing => "transcribing",
            Self::Preprocessing => "preprocessing",
            Self::Configuring => "configuring",
            Self::Training => "training",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: String,
    pub state: UnitState,
    /// Step the unit was in when it failed.
    pub failed_step: Option<UnitState>,
    pub message: Option<String>,
    pub manifest_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub hyperparameters: HyperparameterSet,
    pub units: Vec<UnitOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|u| u.state == UnitState::Done)
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.units.iter().filter(|u| u.state == UnitState::Failed)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Per-run state resolved before the first unit.
struct RunContext {
    run_id: RunId,
    params: HyperparameterSet,
    materializer: ConfigMaterializer,
}

pub struct Pipeline {
    layout: UnitLayout,
    model_dir: PathBuf,
    baseline_config: PathBuf,
    stage_config: PathBuf,
    failure_policy: FailurePolicy,
    runner: Arc<dyn StageRunner>,
    preprocessor: Arc<dyn Preprocessor>,
    progress: Arc<dyn ProgressSink>,
}

impl Pipeline {
    /// Pipeline with the default layout (`Data/`, `default_config.yml`,
    /// `config.yml` relative to the current directory).
    #[must_use]
    pub fn new(
        input_dir: PathBuf,
        model_dir: PathBuf,
        runner: Arc<dyn StageRunner>,
        preprocessor: Arc<dyn Preprocessor>,
    ) -> Self {
        let defaults = PipelineSettings::default();
        Self {
            layout: UnitLayout::new(input_dir, defaults.dataset_root_path()),
            model_dir,
            baseline_config: defaults.baseline_config_path(),
            stage_config: defaults.stage_config_path(),
            failure_policy: defaults.failure_policy,
            runner,
            preprocessor,
            progress: Arc::new(TracingProgressSink),
        }
    }

    /// Pipeline launching real stage processes as described by `settings`.
    #[must_use]
    pub fn from_settings(settings: &PipelineSettings, input_dir: PathBuf, model_dir: PathBuf) -> Self {
        Self::new(input_dir, model_dir, Arc::new(settings.stage_runner()), Arc::new(settings.preprocessor()))
            .with_dataset_root(settings.dataset_root_path())
            .with_baseline_config(settings.baseline_config_path())
            .with_stage_config(settings.stage_config_path())
            .with_failure_policy(settings.failure_policy)
    }

    #[must_use]
    pub fn with_dataset_root(mut self, dataset_root: PathBuf) -> Self {
        self.layout = UnitLayout::new(self.layout.input_dir().to_path_buf(), dataset_root);
        self
    }

    #[must_use]
    pub fn with_baseline_config(mut self, path: PathBuf) -> Self {
        self.baseline_config = path;
        self
    }

    #[must_use]
    pub fn with_stage_config(mut self, path: PathBuf) -> Self {
        self.stage_config = path;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &UnitLayout {
        &self.layout
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Run every unit to `Done` or `Failed`.
    ///
    /// Returns an error for run-fatal conditions: bad hyperparameters, an
    /// unreadable baseline config, a preprocessing failure, or (under
    /// [`FailurePolicy::FailFast`]) the first unit failure.
    pub async fn run(&self) -> PipelineResult<RunReport> {
        let started_at = Utc::now();
        let ctx = self.prepare()?;
        let units = discover_units(&self.layout.units_root())?;
        info!(run_id = %ctx.run_id, units = units.len(), "starting training run");

        let mut outcomes = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            self.progress.on_event(ProgressEvent::UnitStarted {
                unit: unit.name.clone(),
                index,
                total: units.len(),
            });

            let mut state = UnitState::Pending;
            let result = self.run_unit(&ctx, unit, &mut state).await;
            match result {
                Ok(manifest_path) => {
                    self.progress.on_event(ProgressEvent::UnitFinished { unit: unit.name.clone() });
                    outcomes.push(UnitOutcome {
                        unit: unit.name.clone(),
                        state: UnitState::Done,
                        failed_step: None,
                        message: None,
                        manifest_path,
                    });
                }
                Err(e) => {
                    let step = state;
                    self.progress.on_event(ProgressEvent::UnitFailed {
                        unit: unit.name.clone(),
                        step,
                        message: e.to_string(),
                    });

                    // Preprocessing failures point at the environment, not the unit.
                    let isolate = self.failure_policy == FailurePolicy::Isolate
                        && !matches!(e, PipelineError::PreprocessingFailure { .. });
                    if !isolate {
                        return Err(e);
                    }

                    warn!(unit = %unit.name, %step, "unit failed, continuing with next unit");
                    outcomes.push(UnitOutcome {
                        unit: unit.name.clone(),
                        state: UnitState::Failed,
                        failed_step: Some(step),
                        message: Some(e.to_string()),
                        manifest_path: None,
                    });
                }
            }
        }

        Ok(RunReport {
            run_id: ctx.run_id,
            started_at,
            finished_at: Utc::now(),
            hyperparameters: ctx.params,
            units: outcomes,
        })
    }

    fn prepare(&self) -> PipelineResult<RunContext> {
        let raw = load_raw_params(self.layout.input_dir())?;
        let params = HyperparameterSet::resolve(&raw)?;
        info!(?params, "resolved hyperparameters");

        let baseline = BaselineConfig::load(&self.baseline_config)?;
        let materializer = ConfigMaterializer::new(baseline, StageConfigSlot::new(self.stage_config.clone()));

        Ok(RunContext { run_id: RunId::new(), params, materializer })
    }

    async fn run_unit(
        &self,
        ctx: &RunContext,
        unit: &TrainingUnit,
        state: &mut UnitState,
    ) -> PipelineResult<Option<PathBuf>> {
        let name = unit.name.as_str();
        let paths = self.layout.paths_for(name);

        *state = UnitState::Preparing;
        self.layout
            .ensure_dataset_dirs(&paths)
            .map_err(|e| PipelineError::unit_step(name, UnitState::Preparing, e))?;

        *state = UnitState::Segmenting;
        self.run_stage(name, &StageInvocation::segment(&paths.unit_dir, &paths.raw_audio_path))
            .await?;

        *state = UnitState::Transcribing;
        self.run_stage(name, &StageInvocation::transcribe(&paths.raw_audio_path, &paths.label_path, name))
            .await?;

        *state = UnitState::Preprocessing;
        let request = PreprocessRequest::for_unit(name, &ctx.params);
        self.progress.on_event(ProgressEvent::StageStarted { unit: name.to_string(), stage: StageKind::Preprocess });
        let outcome = self.preprocessor.preprocess(&request).await;
        if !outcome.success {
            return Err(PipelineError::PreprocessingFailure { unit: name.to_string(), message: outcome.message });
        }
        self.progress.on_event(ProgressEvent::StageFinished { unit: name.to_string(), stage: StageKind::Preprocess });

        *state = UnitState::Configuring;
        ctx.materializer
            .materialize(name)
            .map_err(|e| PipelineError::unit_step(name, UnitState::Configuring, e))?;
        self.progress.on_event(ProgressEvent::ConfigWritten { unit: name.to_string() });

        *state = UnitState::Training;
        let train = StageInvocation::train(
            request.training_variant(),
            &paths.config_path,
            &paths.dataset_path,
            &self.model_dir,
        );
        self.run_stage(name, &train).await?;

        *state = UnitState::Done;
        Ok(self.write_manifest(ctx, &request).await)
    }

    async fn run_stage(&self, unit: &str, invocation: &StageInvocation) -> PipelineResult<()> {
        self.progress.on_event(ProgressEvent::StageStarted { unit: unit.to_string(), stage: invocation.kind });
        self.runner.run(invocation).await.into_result(unit, invocation.kind)?;
        self.progress.on_event(ProgressEvent::StageFinished { unit: unit.to_string(), stage: invocation.kind });
        Ok(())
    }

    /// Record the unit's checkpoints. Failures here never fail the unit.
    async fn write_manifest(&self, ctx: &RunContext, request: &PreprocessRequest) -> Option<PathBuf> {
        let unit = request.model_name.as_str();
        let collected = artifacts::collect_unit_artifacts_blocking(self.model_dir.clone(), unit.to_string()).await;
        let result = collected.and_then(|artifacts| {
            if artifacts.is_empty() {
                warn!(unit, model_dir = %self.model_dir.display(), "training produced no checkpoints");
            }
            let manifest = UnitManifest {
                run_id: ctx.run_id.clone(),
                unit: unit.to_string(),
                created_at: Utc::now(),
                training_variant: request.training_variant(),
                hyperparameters: ctx.params.clone(),
                artifacts,
            };
            artifacts::write_manifest(&self.model_dir, &manifest)
        });

        match result {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(unit, "failed to write training manifest: {e}");
                None
            }
        }
    }
}
