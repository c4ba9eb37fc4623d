//! Burn training and evaluation entry points.

use std::time::Instant;

use burn::module::{AutodiffModule, Module};
use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use models::{SamplingState, SedClassifier, TeacherForcing};
use sed_dataset::{SedBatch, SedLoader};

use crate::clipping::clip_grad_norm;
use crate::epoch_loop::{run_epochs, CancelToken, EpochReport, EpochRunner, LoopSummary};
use crate::error::{TrainError, TrainResult};
use crate::metrics::{DetectionCounts, DetectionScores};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainConfig {
    pub epochs: usize,
    pub patience: usize,
    pub learning_rate: f64,
    /// Limit on the combined norm of all gradients; disabled when `None` or non-positive.
    pub grad_clip: Option<f32>,
}

pub struct TrainOutcome<M> {
    /// Parameters of the epoch with the lowest validation loss.
    pub model: M,
    pub summary: LoopSummary,
}

/// Mean binary cross-entropy of `logits` against 0/1 `labels`.
fn detection_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 3>) -> Tensor<B, 1> {
    BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init::<B>(&logits.device())
        .forward(logits, labels.int())
}

/// Loss, batch count and detection counts of one pass over a loader.
#[derive(Debug, Clone, Copy, Default)]
struct PassStats {
    loss_sum: f64,
    batches: usize,
    counts: DetectionCounts,
}

impl PassStats {
    fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }
}

/// Forward every batch without labels; `None` when cancelled part way.
fn inference_pass<B, M>(
    model: &M,
    loader: &SedLoader,
    device: &B::Device,
    cancel: &CancelToken,
) -> TrainResult<Option<PassStats>>
where
    B: Backend,
    M: SedClassifier<B>,
{
    let mut stats = PassStats::default();
    for SedBatch { features, labels } in loader.iter::<B>(0, device) {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let logits = model.forward(features, None)?;
        let loss: f64 = detection_loss(logits.clone(), labels.clone())
            .into_scalar()
            .elem();
        stats.loss_sum += loss;
        stats.batches += 1;
        stats.counts.update(sigmoid(logits), labels);
    }
    Ok(Some(stats))
}

/// Corpus-level F1 and error rate of `model` on `loader`.
///
/// No labels reach the model and nothing about it is mutated, so repeated
/// calls on the same loader give identical scores.
pub fn evaluate<B, M>(
    model: &M,
    loader: &SedLoader,
    device: &B::Device,
) -> TrainResult<DetectionScores>
where
    B: Backend,
    M: SedClassifier<B>,
{
    let stats = inference_pass(model, loader, device, &CancelToken::new())?
        .ok_or(TrainError::Cancelled)?;
    if stats.batches == 0 {
        tracing::warn!(split = %loader.split(), "evaluation loader yielded no batches");
    }
    Ok(stats.counts.scores())
}

struct BurnRunner<'a, B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    model: M,
    optim: O,
    learning_rate: f64,
    grad_clip: Option<f64>,
    sampling: &'a mut SamplingState,
    train_loader: &'a SedLoader,
    valid_loader: &'a SedLoader,
    device: B::Device,
}

impl<B, M, O> EpochRunner for BurnRunner<'_, B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SedClassifier<B>,
    M::InnerModule: SedClassifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    type Snapshot = M::Record;

    fn run_epoch(
        &mut self,
        epoch: usize,
        cancel: &CancelToken,
    ) -> TrainResult<Option<EpochReport>> {
        let started = Instant::now();
        let mut train = PassStats::default();
        for (batch_idx, SedBatch { features, labels }) in
            self.train_loader.iter::<B>(epoch, &self.device).enumerate()
        {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if labels.shape().num_elements() == 0 {
                return Err(TrainError::MissingLabels { batch: batch_idx });
            }
            let logits = self.model.forward(
                features,
                Some(TeacherForcing::new(labels.clone(), &mut *self.sampling)),
            )?;
            let loss = detection_loss(logits.clone(), labels.clone());
            let loss_value: f64 = loss.clone().detach().into_scalar().elem();
            let mut grads = GradientsParams::from_grads(loss.backward(), &self.model);
            let grad_norm = self
                .grad_clip
                .map(|clip| clip_grad_norm(&self.model, &mut grads, clip));
            self.model = self
                .optim
                .step(self.learning_rate, self.model.clone(), grads);

            train.loss_sum += loss_value;
            train.batches += 1;
            train.counts.update(sigmoid(logits.detach()), labels);
            tracing::debug!(
                epoch,
                batch = batch_idx,
                loss = loss_value,
                grad_norm = ?grad_norm,
                iteration = self.sampling.iteration(),
                teacher_prob = self.sampling.probability(),
                "train step"
            );
        }
        if train.batches == 0 {
            return Err(TrainError::EmptyLoader("training"));
        }

        let valid_model = self.model.valid();
        let Some(valid) = inference_pass::<B::InnerBackend, _>(
            &valid_model,
            self.valid_loader,
            &self.device,
            cancel,
        )?
        else {
            return Ok(None);
        };
        if valid.batches == 0 {
            return Err(TrainError::EmptyLoader("validation"));
        }

        Ok(Some(EpochReport {
            epoch,
            train_loss: train.mean_loss(),
            valid_loss: valid.mean_loss(),
            train: train.counts.scores(),
            valid: valid.counts.scores(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        }))
    }

    fn snapshot(&self) -> Self::Snapshot {
        self.model.clone().into_record()
    }

    fn restore(&mut self, snapshot: Self::Snapshot) {
        self.model = self.model.clone().load_record(snapshot);
    }
}

/// Optimise `model` with Adam on BCE-with-logits until early stopping, budget
/// exhaustion or cancellation, and hand back the best-validation parameters.
///
/// `sampling` carries the scheduled-sampling counter across epochs; callers
/// configure its batch counter from `train_loader.len()` beforehand.
pub fn train<B, M>(
    model: M,
    cfg: &TrainConfig,
    train_loader: &SedLoader,
    valid_loader: &SedLoader,
    sampling: &mut SamplingState,
    device: &B::Device,
    cancel: &CancelToken,
) -> TrainResult<TrainOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SedClassifier<B>,
    M::InnerModule: SedClassifier<B::InnerBackend>,
{
    let mut runner = BurnRunner {
        model,
        optim: AdamConfig::new().init::<B, M>(),
        learning_rate: cfg.learning_rate,
        grad_clip: cfg.grad_clip.filter(|c| *c > 0.0).map(f64::from),
        sampling,
        train_loader,
        valid_loader,
        device: device.clone(),
    };
    let summary = run_epochs(&mut runner, cfg.epochs, cfg.patience, cancel)?;
    Ok(TrainOutcome {
        model: runner.model,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ADBackend, TrainBackend};
    use burn::module::{ModuleVisitor, ParamId};
    use burn::tensor::TensorData;
    use data_contracts::{DataVersion, DatasetSplit, FeatureManifest};
    use models::{ConvEmbedderConfig, CrnnConfig, SamplingSchedule, TfCrnn};
    use sed_dataset::{build_loader, DataLoaderConfig, FeatureStore};

    /// Values of every float tensor in visiting order.
    #[derive(Default)]
    struct ParamValues(Vec<TensorData>);

    impl<B: Backend> ModuleVisitor<B> for ParamValues {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
            self.0.push(tensor.to_data());
        }
    }

    fn param_values<B: Backend, M: Module<B>>(model: &M) -> Vec<TensorData> {
        let mut values = ParamValues::default();
        model.visit(&mut values);
        values.0
    }

    fn write_split(root: &std::path::Path, split: &str) {
        let (sequences, seq, bins, classes) = (4, 5, 40, 2);
        let manifest = FeatureManifest::sequences(sequences, seq, bins, classes);
        let frames = sequences * seq;
        let features: Vec<f32> = (0..frames * bins).map(|i| (i % 13) as f32 / 13.0).collect();
        let labels: Vec<f32> = (0..frames * classes).map(|i| (i % 3 == 0) as u8 as f32).collect();
        FeatureStore::write(
            &root.join("synthetic").join(split),
            &manifest,
            &features,
            Some(&features),
            &labels,
        )
        .unwrap();
    }

    fn pair(values: [f32; 2]) -> Tensor<TrainBackend, 3> {
        Tensor::from_data(TensorData::new(values.to_vec(), [1, 1, 2]), &Default::default())
    }

    #[test]
    fn loss_matches_closed_form() {
        let loss: f64 = detection_loss(pair([0.0, 2.0]), pair([1.0, 0.0]))
            .into_scalar()
            .elem();
        let expected = (2f64.ln() + (1.0 + 2f64.exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }

    #[test]
    fn loss_stays_finite_for_large_logits() {
        let loss: f64 = detection_loss(pair([500.0, -500.0]), pair([0.0, 1.0]))
            .into_scalar()
            .elem();
        assert!(loss.is_finite());
        assert!((loss - 500.0).abs() < 1e-3, "{loss}");
    }

    #[test]
    fn restore_brings_back_snapshot_after_optimizer_steps() {
        let tmp = tempfile::tempdir().unwrap();
        write_split(tmp.path(), "training");
        write_split(tmp.path(), "validation");
        let cfg = DataLoaderConfig {
            root: tmp.path().to_path_buf(),
            data_version: DataVersion::Synthetic,
            batch_size: 2,
            seed: Some(1),
            ..Default::default()
        };
        let train_loader = build_loader(&cfg, DatasetSplit::Training, None).unwrap();
        let valid_loader = build_loader(&cfg, DatasetSplit::Validation, None).unwrap();

        let device = Default::default();
        let model_cfg = CrnnConfig {
            embedder: ConvEmbedderConfig {
                input_features: 40,
                channels: 2,
                dropout: 0.0,
            },
            rnn_hidden: 4,
            rnn_dropout: 0.0,
            classes: 2,
        };
        let model = TfCrnn::<ADBackend>::new(&model_cfg, &device).unwrap();
        let schedule = SamplingSchedule::new(12.0, 1.0, 0.5, 0.5)
            .unwrap()
            .with_batch_counter(train_loader.len());
        let mut sampling = SamplingState::new(schedule, Some(3));
        let mut runner: BurnRunner<'_, ADBackend, _, _> = BurnRunner {
            model,
            optim: AdamConfig::new().init::<ADBackend, TfCrnn<ADBackend>>(),
            learning_rate: 1e-2,
            grad_clip: Some(1.0),
            sampling: &mut sampling,
            train_loader: &train_loader,
            valid_loader: &valid_loader,
            device,
        };

        let before = param_values(&runner.model);
        let snapshot = runner.snapshot();
        let report = runner.run_epoch(0, &CancelToken::new()).unwrap();
        assert!(report.is_some());
        let trained = param_values(&runner.model);
        assert_ne!(trained, before, "an epoch of Adam steps should move the weights");

        runner.restore(snapshot);
        assert_eq!(param_values(&runner.model), before);
    }
}
