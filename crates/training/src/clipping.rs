//! Gradient clipping by the combined norm of every parameter.

use std::marker::PhantomData;

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

const NORM_EPS: f64 = 1e-6;

struct SquaredNorm<'a, B> {
    grads: &'a GradientsParams,
    total: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let squared: f64 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.total += squared;
        }
    }
}

struct Rescale<'a, B> {
    grads: &'a mut GradientsParams,
    factor: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads
                .register::<B::InnerBackend, D>(id, grad.mul_scalar(self.factor));
        }
    }
}

/// L2 norm of all gradients of `module` taken together.
pub fn global_grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let mut visitor = SquaredNorm::<B> {
        grads,
        total: 0.0,
        _backend: PhantomData,
    };
    module.visit(&mut visitor);
    visitor.total.sqrt()
}

/// Rescale all gradients by `max_norm / norm` when their combined norm exceeds
/// `max_norm`. Returns the norm measured before clipping.
pub fn clip_grad_norm<B, M>(module: &M, grads: &mut GradientsParams, max_norm: f64) -> f64
where
    B: AutodiffBackend,
    M: Module<B>,
{
    let norm = global_grad_norm(module, grads);
    let factor = max_norm / (norm + NORM_EPS);
    if factor < 1.0 {
        let mut visitor = Rescale::<B> {
            grads,
            factor,
            _backend: PhantomData,
        };
        module.visit(&mut visitor);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ADBackend, TrainBackend};
    use burn::nn::{Linear, LinearConfig};

    /// Gives the i-th visited parameter a gradient filled with `values[i]`.
    struct FillGrads<'a> {
        grads: &'a mut GradientsParams,
        values: &'a [f32],
        next: usize,
    }

    impl ModuleVisitor<ADBackend> for FillGrads<'_> {
        fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<ADBackend, D>) {
            let value = self.values[self.next];
            self.next += 1;
            let grad =
                Tensor::<TrainBackend, D>::ones(tensor.shape(), &tensor.device()).mul_scalar(value);
            self.grads.register::<TrainBackend, D>(id, grad);
        }
    }

    struct ReadGrads<'a> {
        grads: &'a GradientsParams,
        values: Vec<f32>,
    }

    impl ModuleVisitor<ADBackend> for ReadGrads<'_> {
        fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<ADBackend, D>) {
            let grad = self.grads.get::<TrainBackend, D>(id).unwrap();
            self.values.push(grad.sum().into_scalar().elem());
        }
    }

    fn scalar_linear(values: &[f32]) -> (Linear<ADBackend>, GradientsParams) {
        let device = Default::default();
        let linear = LinearConfig::new(1, 1).init::<ADBackend>(&device);
        let mut grads = GradientsParams::new();
        linear.visit(&mut FillGrads {
            grads: &mut grads,
            values,
            next: 0,
        });
        (linear, grads)
    }

    fn read(linear: &Linear<ADBackend>, grads: &GradientsParams) -> Vec<f32> {
        let mut reader = ReadGrads {
            grads,
            values: Vec::new(),
        };
        linear.visit(&mut reader);
        reader.values
    }

    #[test]
    fn clips_on_combined_norm_even_when_each_gradient_is_small() {
        // Weight and bias gradients 3 and 4: each under 4.5, together 5.
        let (linear, mut grads) = scalar_linear(&[3.0, 4.0]);
        let norm = clip_grad_norm(&linear, &mut grads, 4.5);
        assert!((norm - 5.0).abs() < 1e-6, "{norm}");

        let clipped = read(&linear, &grads);
        assert_eq!(clipped.len(), 2);
        assert!((clipped[0] - 2.7).abs() < 1e-4, "{clipped:?}");
        assert!((clipped[1] - 3.6).abs() < 1e-4, "{clipped:?}");
        assert!((global_grad_norm(&linear, &grads) - 4.5).abs() < 1e-4);
    }

    #[test]
    fn leaves_gradients_alone_under_the_limit() {
        let (linear, mut grads) = scalar_linear(&[0.3, 0.4]);
        let norm = clip_grad_norm(&linear, &mut grads, 1.0);
        assert!((norm - 0.5).abs() < 1e-6, "{norm}");
        assert_eq!(read(&linear, &grads), vec![0.3, 0.4]);
    }
}
