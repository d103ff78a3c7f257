use crate::error::PipelineResult;
use std::path::{Path, PathBuf};

/// Filesystem layout shared by every stage of a run.
///
/// Raw units are read from `<input_dir>/data/train/<unit>`; each unit's
/// prepared dataset lives under `<dataset_root>/<unit>/...`.
#[derive(Debug, Clone)]
pub struct UnitLayout {
    input_dir: PathBuf,
    dataset_root: PathBuf,
}

/// Per-unit locations derived from the unit name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSet {
    /// Raw source material for the unit (segmenting input).
    pub unit_dir: PathBuf,
    pub dataset_path: PathBuf,
    /// Segmented clips, `dataset_path/raw`.
    pub raw_audio_path: PathBuf,
    /// Transcription output, `dataset_path/esd.list`.
    pub label_path: PathBuf,
    pub train_list_path: PathBuf,
    pub val_list_path: PathBuf,
    /// Model config produced by preprocessing, `dataset_path/config.json`.
    pub config_path: PathBuf,
}

impl PathSet {
    #[must_use]
    pub fn all(&self) -> [&Path; 7] {
        [
            &self.unit_dir,
            &self.dataset_path,
            &self.raw_audio_path,
            &self.label_path,
            &self.train_list_path,
            &self.val_list_path,
            &self.config_path,
        ]
    }
}

impl UnitLayout {
    #[must_use]
    pub fn new(input_dir: PathBuf, dataset_root: PathBuf) -> Self {
        Self { input_dir, dataset_root }
    }

    #[must_use]
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    #[must_use]
    pub fn dataset_root(&self) -> &Path {
        &self.dataset_root
    }

    /// Directory whose subdirectories are the training units.
    #[must_use]
    pub fn units_root(&self) -> PathBuf {
        self.input_dir.join("data").join("train")
    }

    #[must_use]
    pub fn unit_dir(&self, unit: &str) -> PathBuf {
        self.units_root().join(unit)
    }

    #[must_use]
    pub fn paths_for(&self, unit: &str) -> PathSet {
        let dataset_path = self.dataset_root.join(unit);
        PathSet {
            unit_dir: self.unit_dir(unit),
            raw_audio_path: dataset_path.join("raw"),
            label_path: dataset_path.join("esd.list"),
            train_list_path: dataset_path.join("train.list"),
            val_list_path: dataset_path.join("val.list"),
            config_path: dataset_path.join("config.json"),
            dataset_path,
        }
    }

    pub fn ensure_dataset_dirs(&self, paths: &PathSet) -> PipelineResult<()> {
        std::fs::create_dir_all(&paths.raw_audio_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = UnitLayout::new(temp.path().join("input"), temp.path().join("Data"));
        let paths = layout.paths_for("alice");

        assert_eq!(paths.unit_dir, temp.path().join("input/data/train/alice"));
        assert_eq!(paths.dataset_path, temp.path().join("Data/alice"));
        assert_eq!(paths.raw_audio_path, paths.dataset_path.join("raw"));
        assert!(paths.label_path.starts_with(&paths.dataset_path));
        assert!(paths.config_path.to_string_lossy().ends_with("config.json"));
    }

    #[test]
    fn test_paths_are_deterministic() {
        let layout = UnitLayout::new(PathBuf::from("in"), PathBuf::from("Data"));
        assert_eq!(layout.paths_for("bob"), layout.paths_for("bob"));
    }

    #[test]
    fn test_distinct_units_never_share_paths() {
        let layout = UnitLayout::new(PathBuf::from("in"), PathBuf::from("Data"));
        let names = ["alice", "bob", "alice2", "Alice", "a", "raw", "esd.list", "config.json"];

        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                let pa = layout.paths_for(a);
                let pb = layout.paths_for(b);
                let left: HashSet<&Path> = pa.all().into_iter().collect();
                let collisions: Vec<&Path> = pb.all().into_iter().filter(|p| left.contains(p)).collect();
                assert!(collisions.is_empty(), "{a} vs {b}: {collisions:?}");
            }
        }
    }

    #[test]
    fn test_ensure_dataset_dirs() {
        let temp = TempDir::new().unwrap();
        let layout = UnitLayout::new(temp.path().to_path_buf(), temp.path().join("Data"));
        let paths = layout.paths_for("alice");
        layout.ensure_dataset_dirs(&paths).unwrap();
        assert!(paths.raw_audio_path.is_dir());
    }
}
