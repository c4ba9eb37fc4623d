//! Fold-wise experiments: build loaders, train, persist and test.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, Module};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use clap::ValueEnum;
use data_contracts::DatasetSplit;
use models::{Crnn, CrnnConfig, SamplingSchedule, SamplingState, SedClassifier, TfCrnn};
use sed_dataset::{build_loader, SedLoader};

use crate::driver::{evaluate, train};
use crate::epoch_loop::{CancelToken, StopReason};
use crate::error::{TrainError, TrainResult};
use crate::metrics::DetectionScores;
use crate::settings::Settings;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Label feedback with scheduled sampling.
    TfCrnn,
    /// Plain recurrent classifier.
    Crnn,
}

impl ModelKind {
    pub fn from_baseline_flag(baseline: bool) -> Self {
        if baseline {
            ModelKind::Crnn
        } else {
            ModelKind::TfCrnn
        }
    }

    /// Name used in checkpoint file names.
    pub fn checkpoint_name(&self, settings: &Settings) -> String {
        match self {
            ModelKind::TfCrnn => settings.output.model_name.clone(),
            ModelKind::Crnn => format!("baseline_{}", settings.output.model_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldResult {
    pub fold: Option<u8>,
    pub stop_reason: StopReason,
    pub best_epoch: Option<usize>,
    pub best_valid_loss: Option<f64>,
    pub test: DetectionScores,
    pub checkpoint: Option<PathBuf>,
}

pub fn save_checkpoint<B: Backend, M: Module<B>>(model: M, path: &Path) -> TrainResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TrainError::Checkpoint {
            path: parent.to_path_buf(),
            msg: e.to_string(),
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
}

pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> TrainResult<M> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
}

/// Run one experiment per configured fold (once for synthetic data).
///
/// Stops after the first fold whose training was cancelled.
pub fn run_experiment<B: AutodiffBackend>(
    settings: &Settings,
    kind: ModelKind,
    device: &B::Device,
    cancel: &CancelToken,
) -> TrainResult<Vec<FoldResult>> {
    settings.validate()?;
    let mut results = Vec::new();
    for fold in settings.folds() {
        if cancel.is_cancelled() {
            break;
        }
        tracing::info!(fold = ?fold, model = ?kind, "starting experiment");
        if let Some(seed) = settings.experiment.seed {
            B::seed(seed);
        }
        let result = match kind {
            ModelKind::TfCrnn => {
                let model = TfCrnn::<B>::new(&settings.model, device)?;
                run_fold(model, settings, kind, fold, device, cancel)?
            }
            ModelKind::Crnn => {
                let model = Crnn::<B>::new(&settings.model, device)?;
                run_fold(model, settings, kind, fold, device, cancel)?
            }
        };
        let interrupted = result.stop_reason == StopReason::Interrupted;
        results.push(result);
        if interrupted {
            break;
        }
    }
    Ok(results)
}

fn run_fold<B, M>(
    model: M,
    settings: &Settings,
    kind: ModelKind,
    fold: Option<u8>,
    device: &B::Device,
    cancel: &CancelToken,
) -> TrainResult<FoldResult>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SedClassifier<B>,
    M::InnerModule: SedClassifier<B::InnerBackend>,
{
    let train_loader = build_loader(&settings.data_loader, DatasetSplit::Training, fold)?;
    let valid_loader = build_loader(&settings.data_loader, DatasetSplit::Validation, fold)?;
    check_loader_shape(&settings.model, model.classes(), &train_loader)?;
    check_loader_shape(&settings.model, model.classes(), &valid_loader)?;
    if train_loader.is_empty() {
        return Err(TrainError::EmptyLoader("training"));
    }
    let schedule = schedule_for(settings, &train_loader)?;
    let mut sampling = SamplingState::new(schedule, settings.tf.seed);

    tracing::info!(
        params = model.num_params(),
        train_examples = train_loader.examples(),
        train_batches = train_loader.len(),
        valid_examples = valid_loader.examples(),
        valid_batches = valid_loader.len(),
        "model ready"
    );

    let outcome = train(
        model,
        &settings.train_config(),
        &train_loader,
        &valid_loader,
        &mut sampling,
        device,
        cancel,
    )?;

    let checkpoint = if settings.output.save_model {
        let path = settings.checkpoint_path(&kind.checkpoint_name(settings), fold);
        save_checkpoint(outcome.model.clone(), &path)?;
        tracing::info!(path = %path.display(), "saved best model");
        Some(path)
    } else {
        None
    };

    // Fold-based corpora are tested on the fold's validation data.
    let test_loader = build_loader(&settings.data_loader, DatasetSplit::Testing, fold)?;
    check_loader_shape(&settings.model, outcome.model.classes(), &test_loader)?;
    let test = evaluate::<B::InnerBackend, _>(&outcome.model.valid(), &test_loader, device)?;
    tracing::info!(
        fold = ?fold,
        "testing: F1 {:.4}, ER {:.4}",
        test.f1,
        test.error_rate
    );

    Ok(FoldResult {
        fold,
        stop_reason: outcome.summary.stop_reason,
        best_epoch: outcome.summary.best_epoch,
        best_valid_loss: outcome.summary.best_valid_loss,
        test,
        checkpoint,
    })
}

fn schedule_for(settings: &Settings, train_loader: &SedLoader) -> TrainResult<SamplingSchedule> {
    let batches = train_loader.len();
    Ok(settings
        .schedule()?
        .with_batch_counter(batches)
        .with_apply_after((settings.tf.apply_after_epochs * batches) as u64))
}

/// Frames and labels coming out of `loader` must fit the configured model.
fn check_loader_shape(model: &CrnnConfig, classes: usize, loader: &SedLoader) -> TrainResult<()> {
    let expected_features = model.embedder.input_features;
    if loader.feature_dim() != expected_features {
        return Err(TrainError::invalid(format!(
            "{} data has {} features per frame but model.embedder.input_features is {}",
            loader.split(),
            loader.feature_dim(),
            expected_features
        )));
    }
    if loader.classes() != classes {
        return Err(TrainError::invalid(format!(
            "{} data has {} classes but the model predicts {}",
            loader.split(),
            loader.classes(),
            classes
        )));
    }
    Ok(())
}
