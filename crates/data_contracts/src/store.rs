//! On-disk feature store manifest.
//!
//! A store directory holds `manifest.json` next to raw little-endian `f32`
//! files for the input features (plain and normalised) and the frame labels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const FEATURE_MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("unknown dataset split `{0}` (expected training, validation or testing)")]
    UnknownSplit(String),
    #[error("unknown data version `{0}` (expected synthetic, real_life_2016 or real_life_2017)")]
    UnknownDataVersion(String),
    #[error("unsupported manifest schema version {0}")]
    UnsupportedSchema(u32),
    #[error("manifest field `{field}` must be non-zero")]
    ZeroDimension { field: &'static str },
    #[error("sequence layout requires `seq_len`")]
    MissingSeqLen,
    #[error("rows ({rows}) not divisible by seq_len ({seq_len})")]
    RaggedSequences { rows: usize, seq_len: usize },
    #[error("missing file name for `{0}`")]
    MissingFile(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDType {
    F32,
    F16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    Little,
    Big,
}

/// How rows are grouped on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLayout {
    /// `rows` consecutive frames of one long recording; chunked at load time.
    Frames,
    /// `rows` frames already grouped into sequences of `seq_len`.
    Sequences,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureManifest {
    pub schema_version: u32,
    pub layout: StoreLayout,
    /// Total frame count.
    pub rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_len: Option<usize>,
    pub feature_dim: usize,
    pub classes: usize,
    pub dtype: FeatureDType,
    pub endianness: Endianness,
    pub features_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_features_file: Option<String>,
    pub labels_file: String,
    /// Hex-encoded SHA256 per file name; files without an entry are not verified.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

impl FeatureManifest {
    pub fn frames(rows: usize, feature_dim: usize, classes: usize) -> Self {
        Self {
            schema_version: FEATURE_MANIFEST_SCHEMA_VERSION,
            layout: StoreLayout::Frames,
            rows,
            seq_len: None,
            feature_dim,
            classes,
            dtype: FeatureDType::F32,
            endianness: Endianness::Little,
            features_file: "features.f32".into(),
            normalized_features_file: Some("features_norm.f32".into()),
            labels_file: "labels.f32".into(),
            checksums: BTreeMap::new(),
        }
    }

    pub fn sequences(sequences: usize, seq_len: usize, feature_dim: usize, classes: usize) -> Self {
        Self {
            layout: StoreLayout::Sequences,
            rows: sequences * seq_len,
            seq_len: Some(seq_len),
            ..Self::frames(0, feature_dim, classes)
        }
    }

    /// Name of the features file to read.
    pub fn features_file_for(&self, normalized: bool) -> Option<&str> {
        if normalized {
            self.normalized_features_file.as_deref()
        } else {
            Some(self.features_file.as_str())
        }
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.schema_version != FEATURE_MANIFEST_SCHEMA_VERSION {
            return Err(ContractError::UnsupportedSchema(self.schema_version));
        }
        if self.rows == 0 {
            return Err(ContractError::ZeroDimension { field: "rows" });
        }
        if self.feature_dim == 0 {
            return Err(ContractError::ZeroDimension {
                field: "feature_dim",
            });
        }
        if self.classes == 0 {
            return Err(ContractError::ZeroDimension { field: "classes" });
        }
        if self.features_file.trim().is_empty() {
            return Err(ContractError::MissingFile("features_file"));
        }
        if self.labels_file.trim().is_empty() {
            return Err(ContractError::MissingFile("labels_file"));
        }
        if self.layout == StoreLayout::Sequences {
            let seq_len = self.seq_len.ok_or(ContractError::MissingSeqLen)?;
            if seq_len == 0 {
                return Err(ContractError::ZeroDimension { field: "seq_len" });
            }
            if self.rows % seq_len != 0 {
                return Err(ContractError::RaggedSequences {
                    rows: self.rows,
                    seq_len,
                });
            }
        }
        Ok(())
    }
}
