// Checkpoint storage
//
// One subdirectory per checkpoint, containing the adapter weights and a
// metrics manifest. Writes are atomic: everything lands in a `.tmp`
// directory first and is renamed into place, so readers either see a
// complete checkpoint or none at all.

use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{CheckpointRef, FineTuneRun};
use crate::error::Result;

pub const WEIGHTS_FILE: &str = "adapter.safetensors";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const RUN_FILE: &str = "run.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub step: usize,
    pub metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_name(step: usize) -> String {
        format!("step-{step:06}")
    }

    /// Durably write adapter weights plus metrics manifest for `step`.
    pub fn write(
        &self,
        step: usize,
        adapter: &VarMap,
        metrics: BTreeMap<String, f64>,
    ) -> Result<CheckpointRef> {
        let final_dir = self.root.join(Self::dir_name(step));
        let tmp_dir = self.root.join(format!("{}.tmp", Self::dir_name(step)));

        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir)?;
        }
        std::fs::create_dir_all(&tmp_dir)?;

        adapter.save(tmp_dir.join(WEIGHTS_FILE))?;
        let manifest = CheckpointManifest {
            step,
            metrics,
            created_at: Utc::now(),
        };
        std::fs::write(
            tmp_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir)?;
        }
        std::fs::rename(&tmp_dir, &final_dir)?;

        let val_loss = manifest
            .metrics
            .get("val_loss")
            .copied()
            .unwrap_or(f64::INFINITY);
        tracing::debug!(step, dir = %final_dir.display(), val_loss, "Wrote checkpoint");

        Ok(CheckpointRef {
            step,
            dir: final_dir,
            val_loss,
        })
    }

    /// Complete checkpoints under the root, sorted by step. In-progress
    /// `.tmp` directories and directories missing weights or manifest are
    /// ignored.
    pub fn list_valid(&self) -> Result<Vec<CheckpointRef>> {
        let mut checkpoints = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !path.is_dir() || !name.starts_with("step-") || name.ends_with(".tmp") {
                continue;
            }
            if !path.join(WEIGHTS_FILE).exists() || !path.join(MANIFEST_FILE).exists() {
                continue;
            }
            let manifest = read_manifest(&path)?;
            let val_loss = manifest
                .metrics
                .get("val_loss")
                .copied()
                .unwrap_or(f64::INFINITY);
            checkpoints.push(CheckpointRef {
                step: manifest.step,
                dir: path,
                val_loss,
            });
        }
        checkpoints.sort_by_key(|c| c.step);
        Ok(checkpoints)
    }

    pub fn save_run(&self, run: &FineTuneRun) -> Result<()> {
        run.save(&self.root.join(RUN_FILE))
    }

    pub fn load_run(&self) -> Result<FineTuneRun> {
        FineTuneRun::load(&self.root.join(RUN_FILE))
    }
}

pub fn read_manifest(checkpoint_dir: &Path) -> Result<CheckpointManifest> {
    let contents = std::fs::read_to_string(checkpoint_dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;
    use tempfile::TempDir;

    fn adapter_varmap() -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _ = candle_nn::linear(4, 4, vb.pp("blocks.0")).unwrap();
        varmap
    }

    fn metrics(val_loss: f64) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("train_loss".to_string(), val_loss + 0.1);
        m.insert("val_loss".to_string(), val_loss);
        m
    }

    #[test]
    fn test_write_then_list_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path()).unwrap();
        let varmap = adapter_varmap();

        store.write(10, &varmap, metrics(1.5)).unwrap();
        store.write(20, &varmap, metrics(1.2)).unwrap();

        let listed = store.list_valid().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].step, 10);
        assert_eq!(listed[1].step, 20);
        assert_eq!(listed[1].val_loss, 1.2);
    }

    #[test]
    fn test_crashed_write_is_never_listed_as_valid() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path()).unwrap();
        store.write(10, &adapter_varmap(), metrics(2.0)).unwrap();

        // Simulate a crash mid-write: a .tmp directory with partial contents.
        let crashed = temp.path().join("step-000020.tmp");
        std::fs::create_dir_all(&crashed).unwrap();
        std::fs::write(crashed.join(MANIFEST_FILE), "{").unwrap();

        // And a directory that lost its weights file.
        let truncated = temp.path().join("step-000030");
        std::fs::create_dir_all(&truncated).unwrap();
        std::fs::write(
            truncated.join(MANIFEST_FILE),
            serde_json::to_string(&CheckpointManifest {
                step: 30,
                metrics: metrics(1.0),
                created_at: Utc::now(),
            })
            .unwrap(),
        )
        .unwrap();

        let listed = store.list_valid().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].step, 10);
    }

    #[test]
    fn test_rewriting_a_step_replaces_the_checkpoint() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path()).unwrap();
        let varmap = adapter_varmap();

        store.write(10, &varmap, metrics(2.0)).unwrap();
        let replaced = store.write(10, &varmap, metrics(1.0)).unwrap();

        let listed = store.list_valid().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].val_loss, replaced.val_loss);
    }

    #[test]
    fn test_run_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path()).unwrap();
        let run = FineTuneRun::new(super::super::FineTuneConfig {
            tokenizer_path: Some(PathBuf::from("tokenizer.json")),
            ..Default::default()
        });

        store.save_run(&run).unwrap();
        let loaded = store.load_run().unwrap();
        assert_eq!(loaded.id, run.id);
    }
}
