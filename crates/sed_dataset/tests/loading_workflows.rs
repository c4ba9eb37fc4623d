//! End-to-end loading from on-disk stores to Burn batches.

use data_contracts::{DataVersion, DatasetSplit, FeatureManifest};
use sed_dataset::{build_loader, DataLoaderConfig, FeatureStore, SedDatasetError};
use std::path::Path;

type B = burn_ndarray::NdArray<f32>;

fn write_frames(
    dir: &Path,
    frames: usize,
    feature_dim: usize,
    classes: usize,
) -> anyhow::Result<()> {
    let manifest = FeatureManifest::frames(frames, feature_dim, classes);
    let features: Vec<f32> = (0..frames * feature_dim).map(|v| v as f32).collect();
    let norm: Vec<f32> = features.iter().map(|v| v / 100.0).collect();
    let labels = vec![1.0; frames * classes];
    FeatureStore::write(dir, &manifest, &features, Some(&norm), &labels)?;
    Ok(())
}

#[test]
fn real_life_frames_are_chunked_and_padded() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let fold_dir = tmp.path().join("real_life_2017").join("fold_1");
    write_frames(&fold_dir.join("training"), 10, 4, 2)?;

    let cfg = DataLoaderConfig {
        root: tmp.path().to_path_buf(),
        data_version: DataVersion::RealLife2017,
        normalized_features: false,
        batch_size: 2,
        shuffle: true,
        drop_last: false,
        seq_len: 4,
        seed: Some(1),
        ..Default::default()
    };
    let loader = build_loader(&cfg, DatasetSplit::Training, Some(1))?;
    assert_eq!(loader.examples(), 3);
    assert_eq!(loader.len(), 2);

    let device = Default::default();
    let mut labels = Vec::new();
    for batch in loader.iter::<B>(0, &device) {
        let dims = batch.features.dims();
        assert_eq!((dims[1], dims[2]), (4, 4));
        labels.extend(batch.labels.into_data().to_vec::<f32>().unwrap_or_default());
    }
    // 10 real frames, 2 zero-padded frames, 2 classes each.
    assert_eq!(labels.len(), 12 * 2);
    assert_eq!(labels.iter().sum::<f32>(), 20.0);
    Ok(())
}

#[test]
fn fold_testing_split_reads_validation_store() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let fold_dir = tmp.path().join("real_life_2016").join("home").join("fold_3");
    write_frames(&fold_dir.join("validation"), 8, 3, 1)?;

    let cfg = DataLoaderConfig {
        root: tmp.path().to_path_buf(),
        data_version: DataVersion::RealLife2016,
        scene: Some("home".into()),
        batch_size: 1,
        drop_last: false,
        seq_len: 8,
        ..Default::default()
    };
    let loader = build_loader(&cfg, DatasetSplit::Testing, Some(3))?;
    assert_eq!(loader.examples(), 1);
    let batch = loader.iter::<B>(0, &Default::default()).next().unwrap();
    let first = batch.features.into_data().to_vec::<f32>().unwrap_or_default()[1];
    assert!((first - 0.01).abs() < 1e-6, "normalised features expected");
    Ok(())
}

#[test]
fn synthetic_sequences_load_per_split() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("synthetic").join("testing");
    let manifest = FeatureManifest::sequences(3, 5, 2, 4);
    FeatureStore::write(&dir, &manifest, &vec![0.5; 30], Some(&vec![0.0; 30]), &vec![0.0; 60])?;

    let cfg = DataLoaderConfig {
        root: tmp.path().to_path_buf(),
        batch_size: 2,
        drop_last: true,
        ..Default::default()
    };
    let loader = build_loader(&cfg, DatasetSplit::Testing, None)?;
    assert_eq!(loader.seq_len(), 5);
    assert_eq!(loader.classes(), 4);
    assert_eq!(loader.len(), 1);
    Ok(())
}

#[test]
fn missing_store_surfaces_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = DataLoaderConfig {
        root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let err = build_loader(&cfg, DatasetSplit::Training, None).unwrap_err();
    assert!(matches!(err, SedDatasetError::Io { .. }));
}
