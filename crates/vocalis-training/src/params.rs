//! Hyperparameter resolution.
//!
//! A run reads one flat key/value file (`config/hyperparameters.json`) and
//! resolves it against [`HYPERPARAMETER_SCHEMA`]. Every schema key ends up
//! with a typed value: either the coerced file value or the schema default.
//! The result is shared by every training unit in the run.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Raw key/value pairs as read from the hyperparameter file.
pub type RawParams = BTreeMap<String, String>;

/// Typed default for a schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

/// A resolved, typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<ParamDefault> for ParamValue {
    fn from(default: ParamDefault) -> Self {
        match default {
            ParamDefault::Bool(b) => Self::Bool(b),
            ParamDefault::Int(i) => Self::Int(i),
            ParamDefault::Str(s) => Self::Str(s.to_string()),
        }
    }
}

/// One schema entry: canonical key, accepted legacy spellings, typed default.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub key: &'static str,
    pub aliases: &'static [&'static str],
    pub default: ParamDefault,
}

pub const HYPERPARAMETER_SCHEMA: &[ParamSpec] = &[
    ParamSpec { key: "use_extra_features", aliases: &["use_jp_extra"], default: ParamDefault::Bool(true) },
    ParamSpec { key: "batch_size", aliases: &[], default: ParamDefault::Int(4) },
    ParamSpec { key: "epochs", aliases: &[], default: ParamDefault::Int(100) },
    ParamSpec { key: "save_every_steps", aliases: &[], default: ParamDefault::Int(1000) },
    ParamSpec { key: "normalize", aliases: &[], default: ParamDefault::Bool(false) },
    ParamSpec { key: "trim", aliases: &[], default: ParamDefault::Bool(false) },
];

/// Schema-complete mapping of key to typed value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedParams(BTreeMap<&'static str, ParamValue>);

impl ResolvedParams {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            ParamValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn coerce_bool(key: &str, raw: &str) -> PipelineResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(PipelineError::Parameter {
            key: key.to_string(),
            value: raw.to_string(),
            expected: "boolean",
        }),
    }
}

pub fn coerce_int(key: &str, raw: &str) -> PipelineResult<i64> {
    raw.trim().parse::<i64>().map_err(|_| PipelineError::Parameter {
        key: key.to_string(),
        value: raw.to_string(),
        expected: "integer",
    })
}

/// Resolve `raw` against `schema`. Performs no I/O; unknown keys are only logged.
pub fn resolve(raw: &RawParams, schema: &[ParamSpec]) -> PipelineResult<ResolvedParams> {
    let mut resolved = BTreeMap::new();

    for spec in schema {
        let supplied = raw
            .get(spec.key)
            .or_else(|| spec.aliases.iter().find_map(|alias| raw.get(*alias)));

        let value = match (supplied, spec.default) {
            (None, default) => ParamValue::from(default),
            (Some(v), ParamDefault::Bool(_)) => ParamValue::Bool(coerce_bool(spec.key, v)?),
            (Some(v), ParamDefault::Int(_)) => ParamValue::Int(coerce_int(spec.key, v)?),
            (Some(v), ParamDefault::Str(_)) => ParamValue::Str(v.clone()),
        };
        resolved.insert(spec.key, value);
    }

    for key in raw.keys() {
        let known = schema.iter().any(|s| s.key == key.as_str() || s.aliases.contains(&key.as_str()));
        if !known {
            warn!(key = %key, "ignoring unknown hyperparameter");
        }
    }

    Ok(ResolvedParams(resolved))
}

/// Run-wide training hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperparameterSet {
    pub use_extra_features: bool,
    pub batch_size: u32,
    pub epochs: u32,
    pub save_every_steps: u64,
    pub normalize: bool,
    pub trim: bool,
}

impl Default for HyperparameterSet {
    fn default() -> Self {
        Self {
            use_extra_features: true,
            batch_size: 4,
            epochs: 100,
            save_every_steps: 1000,
            normalize: false,
            trim: false,
        }
    }
}

impl HyperparameterSet {
    /// Resolve raw file values against [`HYPERPARAMETER_SCHEMA`].
    pub fn resolve(raw: &RawParams) -> PipelineResult<Self> {
        let resolved = resolve(raw, HYPERPARAMETER_SCHEMA)?;
        Self::from_resolved(&resolved)
    }

    pub fn from_resolved(resolved: &ResolvedParams) -> PipelineResult<Self> {
        Ok(Self {
            use_extra_features: required_bool(resolved, "use_extra_features")?,
            batch_size: positive(resolved, "batch_size")?,
            epochs: positive(resolved, "epochs")?,
            save_every_steps: positive(resolved, "save_every_steps")?,
            normalize: required_bool(resolved, "normalize")?,
            trim: required_bool(resolved, "trim")?,
        })
    }
}

fn required_bool(resolved: &ResolvedParams, key: &str) -> PipelineResult<bool> {
    resolved
        .get_bool(key)
        .ok_or_else(|| PipelineError::Settings(format!("hyperparameter schema has no boolean `{key}`")))
}

fn positive<T: TryFrom<i64>>(resolved: &ResolvedParams, key: &str) -> PipelineResult<T> {
    let value = resolved
        .get_int(key)
        .ok_or_else(|| PipelineError::Settings(format!("hyperparameter schema has no integer `{key}`")))?;
    if value < 1 {
        return Err(PipelineError::Parameter {
            key: key.to_string(),
            value: value.to_string(),
            expected: "positive integer",
        });
    }
    T::try_from(value).map_err(|_| PipelineError::Parameter {
        key: key.to_string(),
        value: value.to_string(),
        expected: "integer in range",
    })
}

const HYPERPARAMETER_FILES: &[&str] = &["hyperparameters.json", "hyperparameters.yaml", "hyperparameters.yml"];

/// Locate the hyperparameter file under `<input_dir>/config`.
#[must_use]
pub fn find_hyperparameter_file(input_dir: &Path) -> Option<PathBuf> {
    let config_dir = input_dir.join("config");
    HYPERPARAMETER_FILES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.is_file())
}

/// Read the run's raw hyperparameters. A missing file yields an empty map.
pub fn load_raw_params(input_dir: &Path) -> PipelineResult<RawParams> {
    let Some(path) = find_hyperparameter_file(input_dir) else {
        warn!(input_dir = %input_dir.display(), "no hyperparameter file found, using defaults");
        return Ok(RawParams::new());
    };
    debug!(path = %path.display(), "reading hyperparameters");
    read_raw_params(&path)
}

pub fn read_raw_params(path: &Path) -> PipelineResult<RawParams> {
    let file_error = |message: String| PipelineError::HyperparameterFile { path: path.to_path_buf(), message };

    let contents = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    if contents.trim().is_empty() {
        return Ok(RawParams::new());
    }

    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let value: serde_json::Value = if is_json {
        serde_json::from_str(&contents).map_err(|e| file_error(e.to_string()))?
    } else {
        serde_yaml::from_str(&contents).map_err(|e| file_error(e.to_string()))?
    };

    let serde_json::Value::Object(map) = value else {
        return Err(file_error("expected a flat key/value mapping".to_string()));
    };

    let mut raw = RawParams::new();
    for (key, value) in map {
        let spelled = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(s) => s,
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                return Err(file_error(format!("value for `{key}` must be a scalar")));
            }
        };
        raw.insert(key, spelled);
    }
    Ok(raw)
}
