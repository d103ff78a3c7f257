//! CLI settings loading.

use anyhow::{Context, Result};
use std::path::Path;
use vocalis_training::PipelineSettings;

/// Load orchestrator settings.
///
/// Configuration precedence:
/// 1. `--config <path>`
/// 2. Local config file (./vocalis.toml)
/// 3. Global config file (~/.vocalis/config.toml)
/// 4. Defaults
pub fn load_settings(explicit: Option<&Path>) -> Result<PipelineSettings> {
    PipelineSettings::load(explicit).context("Failed to load vocalis settings")
}
