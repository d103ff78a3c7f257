//! Vocalis Training
//!
//! Orchestrates speech-synthesis training runs over many voice units:
//! - Resolving run-wide hyperparameters (`HyperparameterSet`)
//! - Deriving per-unit dataset paths (`UnitLayout`, `PathSet`)
//! - Materializing the training stage config (`ConfigMaterializer`)
//! - Running external stages (`StageRunner`, `Preprocessor`)
//! - Driving every unit through the stages in order (`Pipeline`)

pub mod artifacts;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod params;
pub mod pipeline;
pub mod preprocess;
pub mod progress;
pub mod settings;
pub mod stage;
pub mod stage_config;

pub use artifacts::{ArtifactKind, TrainingArtifact, UnitManifest};
pub use discovery::{discover_units, TrainingUnit};
pub use error::{PipelineError, PipelineResult};
pub use layout::{PathSet, UnitLayout};
pub use params::{HyperparameterSet, ParamDefault, ParamSpec, ParamValue, RawParams, ResolvedParams, HYPERPARAMETER_SCHEMA};
pub use pipeline::{Pipeline, RunId, RunReport, UnitOutcome, UnitState};
pub use preprocess::{CommandPreprocessor, PreprocessOutcome, PreprocessRequest, Preprocessor};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgressSink, TracingProgressSink};
pub use settings::{FailurePolicy, PipelineSettings};
pub use stage::{ProcessStageRunner, StageInvocation, StageKind, StageResult, StageRunner, StageScripts, TrainingVariant};
pub use stage_config::{BaselineConfig, ConfigMaterializer, StageConfig, StageConfigSlot};
