//! Per-corpus loading strategies.
//!
//! Every strategy resolves `(root, split, fold, scene)` to a store directory and
//! yields a [`SequenceSet`] of equal-length examples.

use crate::store::FeatureStore;
use crate::types::{DatasetResult, SedDatasetError, SequenceSet};
use data_contracts::{DataVersion, DatasetSplit, StoreLayout};
use std::path::{Path, PathBuf};

/// Sequence length real-life recordings are cut into.
pub const REAL_LIFE_SEQ_LEN: usize = 1024;

pub const FOLDS: std::ops::RangeInclusive<u8> = 1..=4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetStrategy {
    Synthetic,
    RealLife2016 { scene: String },
    RealLife2017,
}

impl DatasetStrategy {
    pub fn from_version(version: DataVersion, scene: Option<&str>) -> DatasetResult<Self> {
        match version {
            DataVersion::Synthetic => Ok(DatasetStrategy::Synthetic),
            DataVersion::RealLife2017 => Ok(DatasetStrategy::RealLife2017),
            DataVersion::RealLife2016 => match scene.map(str::trim) {
                Some(scene) if !scene.is_empty() => Ok(DatasetStrategy::RealLife2016 {
                    scene: scene.to_string(),
                }),
                _ => Err(SedDatasetError::Config(
                    "real_life_2016 requires a scene".into(),
                )),
            },
        }
    }

    pub fn version(&self) -> DataVersion {
        match self {
            DatasetStrategy::Synthetic => DataVersion::Synthetic,
            DatasetStrategy::RealLife2016 { .. } => DataVersion::RealLife2016,
            DatasetStrategy::RealLife2017 => DataVersion::RealLife2017,
        }
    }

    /// Split actually read from disk. Fold-based corpora have no held-out test
    /// data, so testing is served from the fold's validation partition.
    pub fn effective_split(&self, split: DatasetSplit) -> DatasetSplit {
        match (self, split) {
            (DatasetStrategy::Synthetic, split) => split,
            (_, DatasetSplit::Testing) => DatasetSplit::Validation,
            (_, split) => split,
        }
    }

    pub fn store_dir(
        &self,
        root: &Path,
        split: DatasetSplit,
        fold: Option<u8>,
    ) -> DatasetResult<PathBuf> {
        let split = self.effective_split(split);
        let dir = match self {
            DatasetStrategy::Synthetic => root.join("synthetic").join(split.as_str()),
            DatasetStrategy::RealLife2016 { scene } => root
                .join("real_life_2016")
                .join(scene)
                .join(fold_dir(fold)?)
                .join(split.as_str()),
            DatasetStrategy::RealLife2017 => root
                .join("real_life_2017")
                .join(fold_dir(fold)?)
                .join(split.as_str()),
        };
        Ok(dir)
    }

    pub fn load(
        &self,
        root: &Path,
        split: DatasetSplit,
        fold: Option<u8>,
        normalized: bool,
        seq_len: usize,
    ) -> DatasetResult<SequenceSet> {
        let dir = self.store_dir(root, split, fold)?;
        let store = FeatureStore::load(&dir, normalized)?;
        let m = &store.manifest;
        match (self, m.layout) {
            (DatasetStrategy::Synthetic, StoreLayout::Sequences) => {
                let seq_len = m.seq_len.unwrap_or(m.rows);
                SequenceSet::new(store.features, store.labels, seq_len, m.feature_dim, m.classes)
            }
            (DatasetStrategy::Synthetic, StoreLayout::Frames) => Err(SedDatasetError::Unsupported {
                path: dir,
                msg: "synthetic stores must be pre-sequenced".into(),
            }),
            (_, StoreLayout::Frames) => {
                let features = chunk_frames(store.features, m.feature_dim, seq_len);
                let labels = chunk_frames(store.labels, m.classes, seq_len);
                SequenceSet::new(features, labels, seq_len, m.feature_dim, m.classes)
            }
            (_, StoreLayout::Sequences) => Err(SedDatasetError::Unsupported {
                path: dir,
                msg: "real-life stores hold flat frames".into(),
            }),
        }
    }
}

fn fold_dir(fold: Option<u8>) -> DatasetResult<String> {
    match fold {
        Some(fold) if FOLDS.contains(&fold) => Ok(format!("fold_{fold}")),
        Some(fold) => Err(SedDatasetError::Config(format!(
            "fold {fold} outside 1..=4"
        ))),
        None => Err(SedDatasetError::Config(
            "fold-based data version requires a fold".into(),
        )),
    }
}

/// Cut a `[frames, width]` matrix into sequences of `seq_len`, zero-padding
/// the trailing partial sequence. Exact multiples are left untouched.
pub fn chunk_frames(mut values: Vec<f32>, width: usize, seq_len: usize) -> Vec<f32> {
    let frames = values.len() / width.max(1);
    let rem = frames % seq_len.max(1);
    if rem != 0 {
        values.resize(values.len() + (seq_len - rem) * width, 0.0);
    }
    values
}
