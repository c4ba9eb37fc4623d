use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::{sigmoid, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Single-step gated recurrent unit.
///
/// Both projections carry a bias and are packed as `[reset | update | new]`.
#[derive(Debug, Module)]
pub struct GruCell<B: Backend> {
    input_proj: Linear<B>,
    hidden_proj: Linear<B>,
    hidden: usize,
}

impl<B: Backend> GruCell<B> {
    pub fn new(input: usize, hidden: usize, device: &B::Device) -> Self {
        Self {
            input_proj: LinearConfig::new(input, 3 * hidden).init(device),
            hidden_proj: LinearConfig::new(hidden, 3 * hidden).init(device),
            hidden,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden
    }

    /// `x`: `[batch, input]`, `h`: `[batch, hidden]` -> next `h`.
    pub fn forward(&self, x: Tensor<B, 2>, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let gi = self.input_proj.forward(x);
        let gh = self.hidden_proj.forward(h.clone());
        let [batch, _] = gi.dims();
        let hs = self.hidden;
        let gate = |t: &Tensor<B, 2>, k: usize| t.clone().slice([0..batch, k * hs..(k + 1) * hs]);

        let r = sigmoid(gate(&gi, 0) + gate(&gh, 0));
        let z = sigmoid(gate(&gi, 1) + gate(&gh, 1));
        let n = tanh(gate(&gi, 2) + r * gate(&gh, 2));
        // (1 - z) * n + z * h
        n.clone() + z * (h - n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type B = burn_ndarray::NdArray<f32>;

    #[test]
    fn hidden_stays_bounded() {
        let device = Default::default();
        let cell = GruCell::<B>::new(3, 5, &device);
        let mut h = Tensor::<B, 2>::zeros([4, 5], &device);
        for _ in 0..10 {
            h = cell.forward(Tensor::ones([4, 3], &device).mul_scalar(10.0), h);
        }
        assert_eq!(h.dims(), [4, 5]);
        let values = h.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }
}
