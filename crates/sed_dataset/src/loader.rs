//! Batch loading for training, validation and testing.

use crate::strategy::{DatasetStrategy, REAL_LIFE_SEQ_LEN};
use crate::types::{DatasetResult, SedDatasetError, SequenceSet};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use data_contracts::{DataVersion, DatasetSplit};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[data_loader]` settings section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLoaderConfig {
    pub root: PathBuf,
    pub data_version: DataVersion,
    pub scene: Option<String>,
    pub normalized_features: bool,
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    /// Frames per sequence when chunking real-life recordings.
    pub seq_len: usize,
    pub seed: Option<u64>,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            data_version: DataVersion::Synthetic,
            scene: None,
            normalized_features: true,
            batch_size: 8,
            shuffle: true,
            drop_last: true,
            seq_len: REAL_LIFE_SEQ_LEN,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub seed: Option<u64>,
}

impl From<&DataLoaderConfig> for BatchOptions {
    fn from(cfg: &DataLoaderConfig) -> Self {
        Self {
            batch_size: cfg.batch_size,
            shuffle: cfg.shuffle,
            drop_last: cfg.drop_last,
            seed: cfg.seed,
        }
    }
}

/// Build the loader for one split (and fold, for real-life corpora).
pub fn build_loader(
    cfg: &DataLoaderConfig,
    split: DatasetSplit,
    fold: Option<u8>,
) -> DatasetResult<SedLoader> {
    if cfg.seq_len == 0 {
        return Err(SedDatasetError::Config("seq_len must be non-zero".into()));
    }
    let strategy = DatasetStrategy::from_version(cfg.data_version, cfg.scene.as_deref())?;
    let set = strategy.load(
        &cfg.root,
        split,
        fold,
        cfg.normalized_features,
        cfg.seq_len,
    )?;
    let loader = SedLoader::new(set, split, BatchOptions::from(cfg))?;
    tracing::info!(
        version = %cfg.data_version,
        %split,
        fold = ?fold,
        examples = loader.examples(),
        batches = loader.len(),
        "built data loader"
    );
    Ok(loader)
}

/// One batch: `features` is `[batch, time, features]`, `labels` is `[batch, time, classes]`.
#[derive(Debug, Clone)]
pub struct SedBatch<B: Backend> {
    pub features: Tensor<B, 3>,
    pub labels: Tensor<B, 3>,
}

/// Finite, restartable batch source over an in-memory [`SequenceSet`].
#[derive(Debug, Clone)]
pub struct SedLoader {
    set: SequenceSet,
    split: DatasetSplit,
    opts: BatchOptions,
}

impl SedLoader {
    pub fn new(set: SequenceSet, split: DatasetSplit, opts: BatchOptions) -> DatasetResult<Self> {
        if opts.batch_size == 0 {
            return Err(SedDatasetError::Config("batch_size must be non-zero".into()));
        }
        Ok(Self { set, split, opts })
    }

    /// Batch count per epoch.
    pub fn len(&self) -> usize {
        let n = self.set.len();
        if self.opts.drop_last {
            n / self.opts.batch_size
        } else {
            n.div_ceil(self.opts.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn examples(&self) -> usize {
        self.set.len()
    }

    pub fn split(&self) -> DatasetSplit {
        self.split
    }

    pub fn seq_len(&self) -> usize {
        self.set.seq_len
    }

    pub fn feature_dim(&self) -> usize {
        self.set.feature_dim
    }

    pub fn classes(&self) -> usize {
        self.set.classes
    }

    /// Example order for `epoch`. Only the training split is ever shuffled.
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.set.len()).collect();
        if self.opts.shuffle && self.split == DatasetSplit::Training {
            let mut rng = match self.opts.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => StdRng::from_entropy(),
            };
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn iter<B: Backend>(&self, epoch: usize, device: &B::Device) -> SedBatchIter<'_, B> {
        SedBatchIter {
            loader: self,
            order: self.order(epoch),
            cursor: 0,
            device: device.clone(),
        }
    }
}

pub struct SedBatchIter<'a, B: Backend> {
    loader: &'a SedLoader,
    order: Vec<usize>,
    cursor: usize,
    device: B::Device,
}

impl<B: Backend> Iterator for SedBatchIter<'_, B> {
    type Item = SedBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch_size = self.loader.opts.batch_size;
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;
        if self.loader.opts.drop_last && slice.len() < batch_size {
            return None;
        }

        let set = &self.loader.set;
        let mut features = Vec::with_capacity(slice.len() * set.seq_len * set.feature_dim);
        let mut labels = Vec::with_capacity(slice.len() * set.seq_len * set.classes);
        for idx in slice {
            let (x, y) = set.example(*idx)?;
            features.extend_from_slice(x);
            labels.extend_from_slice(y);
        }
        let features = Tensor::<B, 3>::from_data(
            TensorData::new(features, [slice.len(), set.seq_len, set.feature_dim]),
            &self.device,
        );
        let labels = Tensor::<B, 3>::from_data(
            TensorData::new(labels, [slice.len(), set.seq_len, set.classes]),
            &self.device,
        );
        Some(SedBatch { features, labels })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.order.len().saturating_sub(self.cursor);
        let batch_size = self.loader.opts.batch_size;
        let n = if self.loader.opts.drop_last {
            remaining / batch_size
        } else {
            remaining.div_ceil(batch_size)
        };
        (n, Some(n))
    }
}
