//! Error definitions and the in-memory sequence container.

use data_contracts::ContractError;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, SedDatasetError>;

#[derive(Debug, Error)]
pub enum SedDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid manifest at {path}: {source}")]
    Contract {
        path: PathBuf,
        #[source]
        source: ContractError,
    },
    #[error("invalid loader configuration: {0}")]
    Config(String),
    #[error("{path} holds {actual} values, expected {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("unsupported store at {path}: {msg}")]
    Unsupported { path: PathBuf, msg: String },
    #[error("{0}")]
    Other(String),
}

/// Examples of equal length, flattened row-major.
///
/// `features` is `[sequences, seq_len, feature_dim]` and `labels` is
/// `[sequences, seq_len, classes]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSet {
    pub features: Vec<f32>,
    pub labels: Vec<f32>,
    pub sequences: usize,
    pub seq_len: usize,
    pub feature_dim: usize,
    pub classes: usize,
}

impl SequenceSet {
    pub fn new(
        features: Vec<f32>,
        labels: Vec<f32>,
        seq_len: usize,
        feature_dim: usize,
        classes: usize,
    ) -> DatasetResult<Self> {
        if seq_len == 0 || feature_dim == 0 || classes == 0 {
            return Err(SedDatasetError::Other(format!(
                "sequence set dimensions must be non-zero (seq_len={seq_len}, feature_dim={feature_dim}, classes={classes})"
            )));
        }
        let frame_features = seq_len * feature_dim;
        if features.len() % frame_features != 0 {
            return Err(SedDatasetError::Other(format!(
                "{} feature values do not form whole sequences of {seq_len}x{feature_dim}",
                features.len()
            )));
        }
        let sequences = features.len() / frame_features;
        if labels.len() != sequences * seq_len * classes {
            return Err(SedDatasetError::Other(format!(
                "{} label values for {sequences} sequences of {seq_len}x{classes}",
                labels.len()
            )));
        }
        Ok(Self {
            features,
            labels,
            sequences,
            seq_len,
            feature_dim,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.sequences
    }

    pub fn is_empty(&self) -> bool {
        self.sequences == 0
    }

    pub fn example(&self, idx: usize) -> Option<(&[f32], &[f32])> {
        if idx >= self.sequences {
            return None;
        }
        let f = self.seq_len * self.feature_dim;
        let l = self.seq_len * self.classes;
        Some((
            &self.features[idx * f..(idx + 1) * f],
            &self.labels[idx * l..(idx + 1) * l],
        ))
    }
}
