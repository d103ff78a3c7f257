//! Config materialization for the training stage.
//!
//! The baseline template is loaded once per run. Before each unit's training
//! stage the template is copied with `model_name` set to the unit and written
//! to the shared slot the training stage reads from its working directory.

use crate::error::{PipelineError, PipelineResult};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

const MODEL_NAME_KEY: &str = "model_name";

/// Baseline training config template.
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    path: PathBuf,
    document: Mapping,
}

impl BaselineConfig {
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let load_error = |message: String| PipelineError::ConfigLoad { path: path.to_path_buf(), message };

        let contents = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let value: Value = serde_yaml::from_str(&contents).map_err(|e| load_error(e.to_string()))?;
        let Value::Mapping(document) = value else {
            return Err(load_error("baseline config must be a mapping".to_string()));
        };

        Ok(Self { path: path.to_path_buf(), document })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the template with the unit's identity injected.
    #[must_use]
    pub fn for_unit(&self, unit: &str) -> StageConfig {
        let mut document = self.document.clone();
        document.insert(Value::String(MODEL_NAME_KEY.to_string()), Value::String(unit.to_string()));
        StageConfig { model_name: unit.to_string(), document }
    }
}

/// A unit-specific training config.
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    model_name: String,
    document: Mapping,
}

impl StageConfig {
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[must_use]
    pub fn document(&self) -> &Mapping {
        &self.document
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        Ok(serde_yaml::to_string(&self.document)?)
    }
}

/// The single on-disk location the training stage reads its config from.
#[derive(Debug, Clone)]
pub struct StageConfigSlot {
    path: PathBuf,
}

impl StageConfigSlot {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the slot. The file is replaced by rename so a reader never
    /// sees a partially written config.
    pub fn write(&self, config: &StageConfig) -> PipelineResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("yml.tmp");
        std::fs::write(&tmp, config.to_yaml()?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// `model_name` currently stored in the slot.
    pub fn read_model_name(&self) -> PipelineResult<Option<String>> {
        let contents = std::fs::read_to_string(&self.path)?;
        let value: Value = serde_yaml::from_str(&contents)?;
        Ok(value.get(MODEL_NAME_KEY).and_then(Value::as_str).map(str::to_string))
    }
}

/// Writes a fresh [`StageConfig`] into the slot for every unit.
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    baseline: BaselineConfig,
    slot: StageConfigSlot,
}

impl ConfigMaterializer {
    #[must_use]
    pub fn new(baseline: BaselineConfig, slot: StageConfigSlot) -> Self {
        Self { baseline, slot }
    }

    #[must_use]
    pub fn slot(&self) -> &StageConfigSlot {
        &self.slot
    }

    pub fn materialize(&self, unit: &str) -> PipelineResult<StageConfig> {
        let config = self.baseline.for_unit(unit);
        self.slot.write(&config)?;
        debug!(unit, slot = %self.slot.path().display(), "wrote stage config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = "model_name: placeholder\nversion: \"2.5\"\ntrain_ms:\n  env:\n    MASTER_PORT: 10086\n";

    fn baseline(temp: &TempDir) -> BaselineConfig {
        let path = temp.path().join("default_config.yml");
        std::fs::write(&path, TEMPLATE).unwrap();
        BaselineConfig::load(&path).unwrap()
    }

    #[test]
    fn test_unit_name_is_injected_and_rest_preserved() {
        let temp = TempDir::new().unwrap();
        let config = baseline(&temp).for_unit("alice");

        assert_eq!(config.model_name(), "alice");
        assert_eq!(config.document().get("model_name").and_then(Value::as_str), Some("alice"));
        assert_eq!(config.document().get("version").and_then(Value::as_str), Some("2.5"));
        assert!(config.document().get("train_ms").is_some());
    }

    #[test]
    fn test_materialize_overwrites_slot() {
        let temp = TempDir::new().unwrap();
        let slot = StageConfigSlot::new(temp.path().join("config.yml"));
        let materializer = ConfigMaterializer::new(baseline(&temp), slot.clone());

        materializer.materialize("alice").unwrap();
        assert_eq!(slot.read_model_name().unwrap().as_deref(), Some("alice"));

        materializer.materialize("bob").unwrap();
        assert_eq!(slot.read_model_name().unwrap().as_deref(), Some("bob"));
        assert!(!temp.path().join("config.yml.tmp").exists());
    }

    #[test]
    fn test_unicode_unit_name_round_trips() {
        let temp = TempDir::new().unwrap();
        let slot = StageConfigSlot::new(temp.path().join("config.yml"));
        ConfigMaterializer::new(baseline(&temp), slot.clone()).materialize("あみたろ").unwrap();
        assert_eq!(slot.read_model_name().unwrap().as_deref(), Some("あみたろ"));
    }

    #[test]
    fn test_missing_or_malformed_baseline() {
        let temp = TempDir::new().unwrap();
        let missing = BaselineConfig::load(&temp.path().join("nope.yml"));
        assert!(matches!(missing, Err(PipelineError::ConfigLoad { .. })));

        let path = temp.path().join("list.yml");
        std::fs::write(&path, "- a\n- b\n").unwrap();
        assert!(matches!(BaselineConfig::load(&path), Err(PipelineError::ConfigLoad { .. })));

        std::fs::write(&path, "key: [unclosed\n").unwrap();
        assert!(matches!(BaselineConfig::load(&path), Err(PipelineError::ConfigLoad { .. })));
    }
}
