//! Feature-store loading and Burn batching for sound event detection.
//!
//! This crate provides:
//! - Raw `f32` feature stores with JSON manifests and optional SHA256 verification
//! - Per-corpus loading strategies (synthetic, real-life 2016, real-life 2017)
//! - Chunking of long recordings into fixed-length sequences
//! - A restartable batch loader producing Burn tensors

pub mod loader;
pub mod store;
pub mod strategy;
pub mod types;

pub use loader::{build_loader, BatchOptions, DataLoaderConfig, SedBatch, SedBatchIter, SedLoader};
pub use store::{FeatureStore, MANIFEST_FILE};
pub use strategy::{chunk_frames, DatasetStrategy, FOLDS, REAL_LIFE_SEQ_LEN};
pub use types::{DatasetResult, SedDatasetError, SequenceSet};
