use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::crnn::CrnnConfig;
use crate::embedder::ConvEmbedder;
use crate::gru::GruCell;
use crate::{ModelError, ModelResult, SedClassifier, TeacherForcing};

/// Recurrent classifier with label feedback.
///
/// At every step the cell sees the frame embedding concatenated with a label
/// vector for the previous step. With labels supplied, each example
/// independently receives the ground truth (probability from the sampling
/// schedule) or its own thresholded prediction; without labels it always
/// receives its own prediction.
#[derive(Debug, Module)]
pub struct TfCrnn<B: Backend> {
    embedder: ConvEmbedder<B>,
    dropout: Dropout,
    cell: GruCell<B>,
    classifier: Linear<B>,
    classes: usize,
}

impl<B: Backend> TfCrnn<B> {
    pub fn new(cfg: &CrnnConfig, device: &B::Device) -> ModelResult<Self> {
        cfg.validate()?;
        let rnn_in = cfg.embedder.output_width() + cfg.classes;
        Ok(Self {
            embedder: cfg.embedder.init(device)?,
            dropout: DropoutConfig::new(cfg.rnn_dropout).init(),
            cell: GruCell::new(rnn_in, cfg.rnn_hidden, device),
            classifier: LinearConfig::new(cfg.rnn_hidden, cfg.classes).init(device),
            classes: cfg.classes,
        })
    }
}

fn flag_mask<B: Backend>(flags: &[bool], classes: usize, device: &B::Device) -> Tensor<B, 2> {
    let values: Vec<f32> = flags
        .iter()
        .flat_map(|f| std::iter::repeat(if *f { 1.0 } else { 0.0 }).take(classes))
        .collect();
    Tensor::from_data(TensorData::new(values, [flags.len(), classes]), device)
}

impl<B: Backend> SedClassifier<B> for TfCrnn<B> {
    fn forward(
        &self,
        input: Tensor<B, 3>,
        teacher: Option<TeacherForcing<'_, B>>,
    ) -> ModelResult<Tensor<B, 3>> {
        let [batch, steps, _] = input.dims();
        if steps == 0 {
            return Err(ModelError::EmptySequence);
        }
        let classes = self.classes;
        let mut teacher = match teacher {
            Some(tf) if !tf.is_empty() => {
                tf.check_shape([batch, steps, classes])?;
                Some(tf)
            }
            _ => None,
        };

        let emb = self.dropout.forward(self.embedder.forward(input));
        let width = emb.dims()[2];
        let device = emb.device();
        let mut hidden = Tensor::zeros([batch, self.cell.hidden_size()], &device);
        let mut feedback = Tensor::<B, 2>::zeros([batch, classes], &device);
        let mut outputs = Vec::with_capacity(steps);

        for step in 0..steps {
            let flags = teacher.as_mut().map(|tf| tf.sampling.draw_flags(batch));
            let frame = emb
                .clone()
                .slice([0..batch, step..step + 1, 0..width])
                .reshape([batch, width]);
            hidden = self
                .cell
                .forward(Tensor::cat(vec![frame, feedback], 1), hidden);
            let logits = self.classifier.forward(hidden.clone());
            let hard = sigmoid(logits.clone()).greater_elem(0.5).float();

            feedback = match (teacher.as_mut(), flags) {
                (Some(tf), Some(flags)) => {
                    let truth = tf
                        .labels
                        .clone()
                        .slice([0..batch, step..step + 1, 0..classes])
                        .reshape([batch, classes]);
                    tf.sampling.advance();
                    let mask = flag_mask::<B>(&flags, classes, &device);
                    // mask * truth + (1 - mask) * hard
                    hard.clone() + mask * (truth - hard)
                }
                _ => hard,
            };
            outputs.push(logits.unsqueeze_dim::<3>(1));
        }
        Ok(Tensor::cat(outputs, 1))
    }

    fn classes(&self) -> usize {
        self.classes
    }
}
