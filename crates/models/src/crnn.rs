use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::embedder::{ConvEmbedder, ConvEmbedderConfig};
use crate::gru::GruCell;
use crate::{ModelError, ModelResult, SedClassifier, TeacherForcing};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrnnConfig {
    pub embedder: ConvEmbedderConfig,
    pub rnn_hidden: usize,
    pub rnn_dropout: f64,
    pub classes: usize,
}

impl Default for CrnnConfig {
    fn default() -> Self {
        Self {
            embedder: ConvEmbedderConfig::default(),
            rnn_hidden: 128,
            rnn_dropout: 0.25,
            classes: 6,
        }
    }
}

impl CrnnConfig {
    pub fn validate(&self) -> ModelResult<()> {
        self.embedder.validate()?;
        if self.rnn_hidden == 0 {
            return Err(ModelError::config("rnn_hidden must be non-zero"));
        }
        if self.classes == 0 {
            return Err(ModelError::config("classes must be non-zero"));
        }
        if !(0.0..1.0).contains(&self.rnn_dropout) {
            return Err(ModelError::config(format!(
                "rnn_dropout {} outside [0, 1)",
                self.rnn_dropout
            )));
        }
        Ok(())
    }
}

/// Baseline classifier: embeddings go through the cell with no label feedback.
#[derive(Debug, Module)]
pub struct Crnn<B: Backend> {
    embedder: ConvEmbedder<B>,
    dropout: Dropout,
    cell: GruCell<B>,
    classifier: Linear<B>,
    classes: usize,
}

impl<B: Backend> Crnn<B> {
    pub fn new(cfg: &CrnnConfig, device: &B::Device) -> ModelResult<Self> {
        cfg.validate()?;
        Ok(Self {
            embedder: cfg.embedder.init(device)?,
            dropout: DropoutConfig::new(cfg.rnn_dropout).init(),
            cell: GruCell::new(cfg.embedder.output_width(), cfg.rnn_hidden, device),
            classifier: LinearConfig::new(cfg.rnn_hidden, cfg.classes).init(device),
            classes: cfg.classes,
        })
    }
}

impl<B: Backend> SedClassifier<B> for Crnn<B> {
    fn forward(
        &self,
        input: Tensor<B, 3>,
        _teacher: Option<TeacherForcing<'_, B>>,
    ) -> ModelResult<Tensor<B, 3>> {
        let [batch, steps, _] = input.dims();
        if steps == 0 {
            return Err(ModelError::EmptySequence);
        }
        let emb = self.embedder.forward(input);
        let width = emb.dims()[2];
        let mut hidden = Tensor::zeros([batch, self.cell.hidden_size()], &emb.device());
        let mut outputs = Vec::with_capacity(steps);
        for step in 0..steps {
            let frame = emb
                .clone()
                .slice([0..batch, step..step + 1, 0..width])
                .reshape([batch, width]);
            hidden = self.cell.forward(self.dropout.forward(frame), hidden);
            let logits = self.classifier.forward(hidden.clone());
            outputs.push(logits.unsqueeze_dim::<3>(1));
        }
        Ok(Tensor::cat(outputs, 1))
    }

    fn classes(&self) -> usize {
        self.classes
    }
}
