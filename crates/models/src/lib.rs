//! Burn models for frame-level sound event detection.
//!
//! This crate defines:
//! - `ConvEmbedder`: convolutional front end producing one embedding per frame.
//! - `Crnn`: baseline recurrent classifier over the embeddings.
//! - `TfCrnn`: recurrent classifier that feeds label vectors back into the cell,
//!   choosing between ground truth and its own predictions by scheduled sampling.
//!
//! The models are pure Burn modules. Training progress used by scheduled
//! sampling lives in [`SamplingState`], owned by the caller.

pub mod crnn;
pub mod embedder;
pub mod gru;
pub mod sampling;
pub mod tf_crnn;

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use thiserror::Error;

pub use crnn::{Crnn, CrnnConfig};
pub use embedder::{ConvEmbedder, ConvEmbedderConfig};
pub use gru::GruCell;
pub use sampling::{SamplingSchedule, SamplingState};
pub use tf_crnn::TfCrnn;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid model configuration: {0}")]
    Config(String),
    #[error("label shape {actual:?} does not match prediction shape {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },
    #[error("input has no time steps")]
    EmptySequence,
}

impl ModelError {
    pub fn config(msg: impl Into<String>) -> Self {
        ModelError::Config(msg.into())
    }
}

/// Ground truth plus the sampling state used to pick the fed-back labels.
pub struct TeacherForcing<'a, B: Backend> {
    /// `[batch, time, classes]`.
    pub labels: Tensor<B, 3>,
    pub sampling: &'a mut SamplingState,
}

impl<'a, B: Backend> TeacherForcing<'a, B> {
    pub fn new(labels: Tensor<B, 3>, sampling: &'a mut SamplingState) -> Self {
        Self { labels, sampling }
    }

    /// A label tensor without elements carries no supervision.
    pub fn is_empty(&self) -> bool {
        self.labels.shape().num_elements() == 0
    }

    pub(crate) fn check_shape(&self, expected: [usize; 3]) -> ModelResult<()> {
        let actual = self.labels.dims();
        if actual != expected {
            return Err(ModelError::ShapeMismatch { expected, actual });
        }
        Ok(())
    }
}

/// Sequence classifier producing per-frame class logits.
pub trait SedClassifier<B: Backend> {
    /// `input`: `[batch, time, features]` -> logits `[batch, time, classes]`.
    ///
    /// `teacher` is `None` for inference. Empty labels are treated the same way.
    fn forward(
        &self,
        input: Tensor<B, 3>,
        teacher: Option<TeacherForcing<'_, B>>,
    ) -> ModelResult<Tensor<B, 3>>;

    fn classes(&self) -> usize;
}

pub mod prelude {
    pub use super::{
        ConvEmbedder, ConvEmbedderConfig, Crnn, CrnnConfig, ModelError, ModelResult,
        SamplingSchedule, SamplingState, SedClassifier, TeacherForcing, TfCrnn,
    };
}
