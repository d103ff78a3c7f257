use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One named directory of raw material, trained into one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingUnit {
    pub name: String,
    pub dir: PathBuf,
}

impl std::fmt::Display for TrainingUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

pub fn validate_unit_name(name: &str) -> PipelineResult<()> {
    if name.trim().is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(PipelineError::InvalidUnit(name.to_string()));
    }
    Ok(())
}

/// Enumerate the training units under `units_root`, sorted by name.
///
/// Plain files, hidden directories and names that are not valid UTF-8 are skipped.
pub fn discover_units(units_root: &Path) -> PipelineResult<Vec<TrainingUnit>> {
    let discovery_error =
        |e: std::io::Error| PipelineError::Discovery { path: units_root.to_path_buf(), message: e.to_string() };

    let mut units = Vec::new();
    for entry in std::fs::read_dir(units_root).map_err(discovery_error)? {
        let entry = entry.map_err(discovery_error)?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %dir.display(), "skipping unit with non UTF-8 name");
            continue;
        };
        if let Err(e) = validate_unit_name(&name) {
            warn!(path = %dir.display(), "skipping directory: {e}");
            continue;
        }

        units.push(TrainingUnit { name, dir });
    }

    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(units)
}
