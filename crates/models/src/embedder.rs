use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::{ModelError, ModelResult};

/// Frequency pooling applied after each conv block.
const FREQ_POOLS: [usize; 3] = [5, 4, 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvEmbedderConfig {
    /// Feature bins per input frame.
    pub input_features: usize,
    pub channels: usize,
    pub dropout: f64,
}

impl Default for ConvEmbedderConfig {
    fn default() -> Self {
        Self {
            input_features: 40,
            channels: 128,
            dropout: 0.25,
        }
    }
}

impl ConvEmbedderConfig {
    fn pooled_bins(&self) -> usize {
        FREQ_POOLS.iter().fold(self.input_features, |bins, pool| bins / pool)
    }

    /// Width of the per-frame embedding.
    pub fn output_width(&self) -> usize {
        self.channels * self.pooled_bins()
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.channels == 0 {
            return Err(ModelError::config("embedder channels must be non-zero"));
        }
        if self.pooled_bins() == 0 {
            return Err(ModelError::config(format!(
                "{} feature bins pool down to zero (need at least 40)",
                self.input_features
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::config(format!(
                "embedder dropout {} outside [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<ConvEmbedder<B>> {
        self.validate()?;
        let blocks = FREQ_POOLS
            .iter()
            .enumerate()
            .map(|(idx, pool)| {
                let in_channels = if idx == 0 { 1 } else { self.channels };
                ConvBlock {
                    conv: Conv2dConfig::new([in_channels, self.channels], [5, 5])
                        .with_padding(PaddingConfig2d::Explicit(2, 2))
                        .init(device),
                    norm: BatchNormConfig::new(self.channels).init(device),
                    pool: MaxPool2dConfig::new([1, *pool])
                        .with_strides([1, *pool])
                        .init(),
                }
            })
            .collect();
        Ok(ConvEmbedder {
            blocks,
            dropout: DropoutConfig::new(self.dropout).init(),
            channels: self.channels,
        })
    }
}

#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(relu(self.norm.forward(self.conv.forward(x))))
    }
}

/// Convolutional front end mapping `[batch, time, bins]` to `[batch, time, width]`.
///
/// Pooling only touches the frequency axis, so the time resolution of the
/// input is preserved.
#[derive(Debug, Module)]
pub struct ConvEmbedder<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    dropout: Dropout,
    channels: usize,
}

impl<B: Backend> ConvEmbedder<B> {
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, time, _] = input.dims();
        let mut x: Tensor<B, 4> = input.unsqueeze_dim(1);
        for (idx, block) in self.blocks.iter().enumerate() {
            if idx > 0 {
                x = self.dropout.forward(x);
            }
            x = block.forward(x);
        }
        let x = self.dropout.forward(x);
        // [b, c, t, f'] -> [b, t, c, f'] -> [b, t, c * f']
        let [_, channels, _, bins] = x.dims();
        x.swap_dims(1, 2).reshape([batch, time, channels * bins])
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
