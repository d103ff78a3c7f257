use crate::error::{PipelineError, PipelineResult};
use crate::params::HyperparameterSet;
use crate::pipeline::RunId;
use crate::stage::TrainingVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extensions the serving layer loads as model weights.
pub const CHECKPOINT_EXTENSIONS: &[&str] = &["pth", "pt", "safetensors"];

pub const MANIFEST_FILE_NAME: &str = "training_manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Checkpoint,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

/// Written next to a unit's trained weights once its training stage succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitManifest {
    pub run_id: RunId,
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub training_variant: TrainingVariant,
    pub hyperparameters: HyperparameterSet,
    pub artifacts: Vec<TrainingArtifact>,
}

impl UnitManifest {
    #[must_use]
    pub fn checkpoints(&self) -> impl Iterator<Item = &TrainingArtifact> {
        self.artifacts.iter().filter(|a| a.kind == ArtifactKind::Checkpoint)
    }
}

/// Directory the training stage writes a unit's model into.
#[must_use]
pub fn unit_model_dir(model_dir: &Path, unit: &str) -> PathBuf {
    model_dir.join(unit)
}

/// Streams the file through the hasher; checkpoints can be several GB.
pub fn sha256_file(path: &Path) -> PipelineResult<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> PipelineResult<TrainingArtifact> {
    if !path.exists() {
        return Err(PipelineError::Artifact(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(&path)?;
    Ok(TrainingArtifact { kind, path, sha256: hash })
}

fn is_checkpoint(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| CHECKPOINT_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(ext)))
}

/// Checkpoint files under `dir`, sorted. A missing directory yields nothing.
pub fn discover_checkpoints(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| PipelineError::Artifact(e.to_string()))?;
        if entry.file_type().is_file() && is_checkpoint(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Hash every checkpoint under the unit's model directory.
pub fn collect_unit_artifacts(model_dir: &Path, unit: &str) -> PipelineResult<Vec<TrainingArtifact>> {
    discover_checkpoints(&unit_model_dir(model_dir, unit))?
        .into_iter()
        .map(|path| make_artifact(ArtifactKind::Checkpoint, path))
        .collect()
}

/// [`collect_unit_artifacts`] on the blocking pool, off the async workers.
pub async fn collect_unit_artifacts_blocking(
    model_dir: PathBuf,
    unit: String,
) -> PipelineResult<Vec<TrainingArtifact>> {
    tokio::task::spawn_blocking(move || collect_unit_artifacts(&model_dir, &unit))
        .await
        .map_err(|e| PipelineError::Artifact(format!("checkpoint hashing task failed: {e}")))?
}

pub fn write_manifest(model_dir: &Path, manifest: &UnitManifest) -> PipelineResult<PathBuf> {
    let dir = unit_model_dir(model_dir, &manifest.unit);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(MANIFEST_FILE_NAME);
    std::fs::write(&path, serde_json::to_string_pretty(manifest)?)?;
    Ok(path)
}

pub fn read_manifest(path: &Path) -> PipelineResult<UnitManifest> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice::<UnitManifest>(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_checkpoints_filters_and_sorts() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("alice");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("G_1000.pth"), b"g").unwrap();
        std::fs::write(dir.join("alice_e1_s100.safetensors"), b"s").unwrap();
        std::fs::write(dir.join("nested/model.PT"), b"p").unwrap();
        std::fs::write(dir.join("config.json"), b"{}").unwrap();

        let found = discover_checkpoints(&dir).unwrap();
        let names: Vec<_> = found.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, ["G_1000.pth", "alice_e1_s100.safetensors", "model.PT"]);

        assert!(discover_checkpoints(&temp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_manifest_round_trip() {
        let temp = TempDir::new().unwrap();
        let dir = unit_model_dir(temp.path(), "alice");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("G_0.pth"), b"weights").unwrap();

        let artifacts = collect_unit_artifacts(temp.path(), "alice").unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].sha256, sha256_file(&dir.join("G_0.pth")).unwrap());

        let manifest = UnitManifest {
            run_id: RunId::new(),
            unit: "alice".to_string(),
            created_at: Utc::now(),
            training_variant: TrainingVariant::ExtraFeatures,
            hyperparameters: HyperparameterSet::default(),
            artifacts,
        };
        let path = write_manifest(temp.path(), &manifest).unwrap();
        let loaded = read_manifest(&path).unwrap();
        assert_eq!(loaded.unit, "alice");
        assert_eq!(loaded.checkpoints().count(), 1);
    }

    #[test]
    fn test_make_artifact_requires_existing_path() {
        let temp = TempDir::new().unwrap();
        assert!(make_artifact(ArtifactKind::Other, temp.path().join("nope")).is_err());
    }

    #[test]
    fn test_sha256_file_streams_large_files() {
        let temp = TempDir::new().unwrap();
        let small = temp.path().join("abc.pt");
        std::fs::write(&small, b"abc").unwrap();
        assert_eq!(
            sha256_file(&small).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        // Larger than any single read buffer.
        let bytes: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let large = temp.path().join("G_1.pth");
        std::fs::write(&large, &bytes).unwrap();
        assert_eq!(sha256_file(&large).unwrap(), hex::encode(Sha256::digest(&bytes)));
    }

    #[tokio::test]
    async fn test_collect_unit_artifacts_blocking() {
        let temp = TempDir::new().unwrap();
        let dir = unit_model_dir(temp.path(), "alice");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("D_0.pth"), b"d").unwrap();

        let artifacts = collect_unit_artifacts_blocking(temp.path().to_path_buf(), "alice".to_string()).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::Checkpoint);
    }
}
