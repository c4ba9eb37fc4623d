//! Frame-level detection metrics.
//!
//! Predictions are probabilities (sigmoid of the logits). A frame/class cell is
//! positive when the prediction is `>= 0.5`. All scores are corpus level: counts
//! are summed over every frame before any ratio is taken.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

pub const EPSILON: f64 = f64::EPSILON;
pub const THRESHOLD: f64 = 0.5;

/// Per-cell confusion indicators, `[frames, classes]` or reduced along one axis.
#[derive(Debug, Clone)]
pub struct Confusion<B: Backend> {
    pub tp: Tensor<B, 2>,
    pub tn: Tensor<B, 2>,
    pub fp: Tensor<B, 2>,
    pub fn_: Tensor<B, 2>,
}

fn flatten<B: Backend, const D: usize>(t: Tensor<B, D>) -> Tensor<B, 2> {
    let classes = t.dims()[D - 1].max(1);
    let rows = t.shape().num_elements() / classes;
    t.reshape([rows, classes])
}

fn total<B: Backend, const D: usize>(t: Tensor<B, D>) -> f64 {
    t.sum().into_scalar().elem::<f64>()
}

/// Confusion indicators of `y_hat` against binary `y_true`.
///
/// Leading dimensions are collapsed to `[*, classes]`. With `sum_dim` set the
/// indicators are summed along that axis (kept with size 1).
pub fn confusion<B: Backend, const D: usize>(
    y_hat: Tensor<B, D>,
    y_true: Tensor<B, D>,
    sum_dim: Option<usize>,
) -> Confusion<B> {
    let y_hat = flatten(y_hat);
    let y_true = flatten(y_true);
    let pred_pos = y_hat.clone().greater_equal_elem(THRESHOLD).float();
    let pred_neg = y_hat.lower_elem(THRESHOLD).float();
    let true_pos = y_true.clone().equal_elem(1.0).float();
    let true_neg = y_true.equal_elem(0.0).float();

    let confusion = Confusion {
        tp: pred_pos.clone() * true_pos.clone(),
        tn: pred_neg.clone() * true_neg.clone(),
        fp: pred_pos * true_neg,
        fn_: pred_neg * true_pos,
    };
    match sum_dim {
        Some(dim) => Confusion {
            tp: confusion.tp.sum_dim(dim),
            tn: confusion.tn.sum_dim(dim),
            fp: confusion.fp.sum_dim(dim),
            fn_: confusion.fn_.sum_dim(dim),
        },
        None => confusion,
    }
}

pub fn f1(tp: f64, fp: f64, fn_: f64) -> f64 {
    if tp == 0.0 && fp == 0.0 && fn_ == 0.0 {
        return 0.0;
    }
    2.0 * tp / (2.0 * tp + fp + fn_ + EPSILON)
}

/// Substitution, deletion and insertion totals plus the reference positive count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorTerms {
    pub substitutions: f64,
    pub deletions: f64,
    pub insertions: f64,
    pub reference: f64,
}

impl ErrorTerms {
    pub fn of<B: Backend, const D: usize>(y_hat: Tensor<B, D>, y_true: Tensor<B, D>) -> Self {
        let reference = total(y_true.clone());
        let c = confusion(y_hat, y_true, Some(1));
        let (fn_, fp) = (c.fn_, c.fp);
        Self {
            substitutions: total(fn_.clone().min_pair(fp.clone())),
            deletions: total((fn_.clone() - fp.clone()).clamp_min(0.0)),
            insertions: total((fp - fn_).clamp_min(0.0)),
            reference,
        }
    }

    pub fn rate(&self) -> f64 {
        (self.substitutions + self.deletions + self.insertions) / (self.reference + EPSILON)
    }
}

pub fn error_rate<B: Backend, const D: usize>(y_hat: Tensor<B, D>, y_true: Tensor<B, D>) -> f64 {
    ErrorTerms::of(y_hat, y_true).rate()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectionScores {
    pub f1: f64,
    pub error_rate: f64,
}

/// Streaming accumulator; every term is additive across batches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectionCounts {
    pub tp: f64,
    pub tn: f64,
    pub fp: f64,
    pub fn_: f64,
    pub errors: ErrorTerms,
}

impl DetectionCounts {
    pub fn update<B: Backend, const D: usize>(
        &mut self,
        y_hat: Tensor<B, D>,
        y_true: Tensor<B, D>,
    ) {
        let c = confusion(y_hat.clone(), y_true.clone(), None);
        self.tp += total(c.tp);
        self.tn += total(c.tn);
        self.fp += total(c.fp);
        self.fn_ += total(c.fn_);
        let e = ErrorTerms::of(y_hat, y_true);
        self.errors.substitutions += e.substitutions;
        self.errors.deletions += e.deletions;
        self.errors.insertions += e.insertions;
        self.errors.reference += e.reference;
    }

    pub fn f1(&self) -> f64 {
        f1(self.tp, self.fp, self.fn_)
    }

    pub fn error_rate(&self) -> f64 {
        self.errors.rate()
    }

    pub fn scores(&self) -> DetectionScores {
        DetectionScores {
            f1: self.f1(),
            error_rate: self.error_rate(),
        }
    }
}
