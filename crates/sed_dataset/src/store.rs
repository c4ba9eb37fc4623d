//! Raw feature-store reading and writing.

use crate::types::{DatasetResult, SedDatasetError};
use data_contracts::{Endianness, FeatureDType, FeatureManifest};
use sha2::Digest;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// A store directory read fully into memory.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    pub dir: PathBuf,
    pub manifest: FeatureManifest,
    pub features: Vec<f32>,
    pub labels: Vec<f32>,
}

impl FeatureStore {
    pub fn load_manifest(dir: &Path) -> DatasetResult<FeatureManifest> {
        let path = dir.join(MANIFEST_FILE);
        let raw = fs::read(&path).map_err(|e| SedDatasetError::Io {
            path: path.clone(),
            source: e,
        })?;
        let manifest: FeatureManifest =
            serde_json::from_slice(&raw).map_err(|e| SedDatasetError::Json {
                path: path.clone(),
                source: e,
            })?;
        manifest
            .validate()
            .map_err(|e| SedDatasetError::Contract { path, source: e })?;
        Ok(manifest)
    }

    /// Read the manifest and both value files; `normalized` picks the normalised features.
    pub fn load(dir: &Path, normalized: bool) -> DatasetResult<Self> {
        let manifest = Self::load_manifest(dir)?;
        if manifest.dtype != FeatureDType::F32 {
            return Err(SedDatasetError::Unsupported {
                path: dir.to_path_buf(),
                msg: format!("dtype {:?}", manifest.dtype),
            });
        }
        let features_name =
            manifest
                .features_file_for(normalized)
                .ok_or_else(|| SedDatasetError::Unsupported {
                    path: dir.to_path_buf(),
                    msg: "normalized features requested but store has none".into(),
                })?;
        let features = read_values(
            &dir.join(features_name),
            manifest.rows * manifest.feature_dim,
            manifest.endianness,
            manifest.checksums.get(features_name),
        )?;
        let labels = read_values(
            &dir.join(&manifest.labels_file),
            manifest.rows * manifest.classes,
            manifest.endianness,
            manifest.checksums.get(&manifest.labels_file),
        )?;
        tracing::debug!(
            dir = %dir.display(),
            rows = manifest.rows,
            normalized,
            "loaded feature store"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            features,
            labels,
        })
    }

    /// Write a little-endian store and return the manifest with checksums filled in.
    pub fn write(
        dir: &Path,
        manifest: &FeatureManifest,
        features: &[f32],
        normalized_features: Option<&[f32]>,
        labels: &[f32],
    ) -> DatasetResult<FeatureManifest> {
        fs::create_dir_all(dir).map_err(|e| SedDatasetError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let mut manifest = manifest.clone();
        manifest.endianness = Endianness::Little;
        manifest.dtype = FeatureDType::F32;
        manifest.checksums.clear();
        if normalized_features.is_none() {
            manifest.normalized_features_file = None;
        }

        let mut files: Vec<(String, &[f32])> = vec![
            (manifest.features_file.clone(), features),
            (manifest.labels_file.clone(), labels),
        ];
        if let (Some(name), Some(values)) =
            (manifest.normalized_features_file.clone(), normalized_features)
        {
            files.push((name, values));
        }
        for (name, values) in files {
            let bytes = encode_le(values);
            let checksum = format!("{:x}", sha2::Sha256::digest(&bytes));
            let path = dir.join(&name);
            fs::write(&path, bytes).map_err(|e| SedDatasetError::Io { path, source: e })?;
            manifest.checksums.insert(name, checksum);
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        manifest
            .validate()
            .map_err(|e| SedDatasetError::Contract {
                path: manifest_path.clone(),
                source: e,
            })?;
        let data = serde_json::to_vec_pretty(&manifest).map_err(|e| SedDatasetError::Json {
            path: manifest_path.clone(),
            source: e,
        })?;
        fs::write(&manifest_path, data).map_err(|e| SedDatasetError::Io {
            path: manifest_path,
            source: e,
        })?;
        Ok(manifest)
    }
}

fn encode_le(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn read_values(
    path: &Path,
    expected: usize,
    endianness: Endianness,
    checksum: Option<&String>,
) -> DatasetResult<Vec<f32>> {
    let bytes = fs::read(path).map_err(|e| SedDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if let Some(expected_sum) = checksum {
        let actual = format!("{:x}", sha2::Sha256::digest(&bytes));
        if !actual.eq_ignore_ascii_case(expected_sum) {
            return Err(SedDatasetError::Checksum {
                path: path.to_path_buf(),
                expected: expected_sum.clone(),
                actual,
            });
        }
    }
    if bytes.len() % 4 != 0 || bytes.len() / 4 != expected {
        return Err(SedDatasetError::SizeMismatch {
            path: path.to_path_buf(),
            expected,
            actual: bytes.len() / 4,
        });
    }
    let values = bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(chunk);
            match endianness {
                Endianness::Little => f32::from_le_bytes(arr),
                Endianness::Big => f32::from_be_bytes(arr),
            }
        })
        .collect();
    Ok(values)
}
