//! Settings file -> experiment -> checkpoint -> reload.

use burn::module::Module;
use data_contracts::{DatasetSplit, FeatureManifest};
use models::TfCrnn;
use sed_dataset::{build_loader, FeatureStore};
use training::{
    evaluate, load_checkpoint, run_experiment, ADBackend, CancelToken, ModelKind, Settings,
    TrainBackend, TrainError,
};

fn write_fold(root: &std::path::Path, fold: u8, split: &str, frames: usize) -> anyhow::Result<()> {
    let manifest = FeatureManifest::frames(frames, 40, 3);
    let features: Vec<f32> = (0..frames * 40).map(|i| (i % 11) as f32 / 11.0).collect();
    let labels: Vec<f32> = (0..frames * 3).map(|i| (i % 2) as f32).collect();
    let dir = root
        .join("real_life_2017")
        .join(format!("fold_{fold}"))
        .join(split);
    FeatureStore::write(&dir, &manifest, &features, Some(&features), &labels)?;
    Ok(())
}

fn tiny_settings(root: &std::path::Path) -> anyhow::Result<Settings> {
    let config = format!(
        r#"
        [data_loader]
        root = "{root}"
        data_version = "real_life_2017"
        batch_size = 2
        drop_last = false
        seq_len = 5
        seed = 3

        [model]
        rnn_hidden = 4
        classes = 3
        [model.embedder]
        channels = 2

        [training]
        epochs = 2
        patience = 1

        [optimizer]
        lr = 0.001

        [output]
        dir = "{out}"
        states_path = "states"
        model_name = "tiny"

        [experiment]
        folds = [2]
        seed = 42
        "#,
        root = root.display(),
        out = root.join("outputs").display(),
    );
    let path = root.join("settings.toml");
    std::fs::write(&path, config)?;
    Ok(Settings::load(&path)?)
}

#[test]
fn fold_experiment_writes_loadable_checkpoint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_fold(tmp.path(), 2, "training", 20)?;
    write_fold(tmp.path(), 2, "validation", 10)?;
    let settings = tiny_settings(tmp.path())?;

    let device = Default::default();
    let results =
        run_experiment::<ADBackend>(&settings, ModelKind::TfCrnn, &device, &CancelToken::new())?;
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.fold, Some(2));
    let ckpt = result.checkpoint.clone().expect("checkpoint written");
    assert!(ckpt.ends_with("model_tiny_fold_2.bin"));
    assert!(ckpt.exists());

    let fresh = TfCrnn::<TrainBackend>::new(&settings.model, &device)?;
    let params = fresh.num_params();
    let loaded = load_checkpoint(fresh, &ckpt, &device)?;
    assert_eq!(loaded.num_params(), params);
    let loader = build_loader(&settings.data_loader, DatasetSplit::Testing, Some(2))?;
    let scores = evaluate::<TrainBackend, _>(&loaded, &loader, &device)?;
    assert_eq!(scores, result.test);
    Ok(())
}

#[test]
fn missing_store_fails_before_training() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.data_loader.root = tmp.path().to_path_buf();
    settings.training.epochs = 1;
    let err = run_experiment::<ADBackend>(
        &settings,
        ModelKind::Crnn,
        &Default::default(),
        &CancelToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, TrainError::Dataset(_)));
}

#[test]
fn feature_width_mismatch_is_a_settings_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_fold(tmp.path(), 2, "training", 20)?;
    write_fold(tmp.path(), 2, "validation", 10)?;
    let mut settings = tiny_settings(tmp.path())?;
    settings.model.embedder.input_features = 80;

    let err = run_experiment::<ADBackend>(
        &settings,
        ModelKind::TfCrnn,
        &Default::default(),
        &CancelToken::new(),
    )
    .unwrap_err();
    match err {
        TrainError::InvalidSettings(msg) => assert!(msg.contains("input_features"), "{msg}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!tmp.path().join("outputs").exists());
    Ok(())
}

#[test]
fn class_count_mismatch_is_a_settings_error_for_the_baseline() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_fold(tmp.path(), 2, "training", 20)?;
    write_fold(tmp.path(), 2, "validation", 10)?;
    let mut settings = tiny_settings(tmp.path())?;
    settings.model.classes = 2;

    let err = run_experiment::<ADBackend>(
        &settings,
        ModelKind::Crnn,
        &Default::default(),
        &CancelToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, TrainError::InvalidSettings(_)), "{err}");
    Ok(())
}
