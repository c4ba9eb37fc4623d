#![recursion_limit = "256"]

pub mod clipping;
pub mod driver;
pub mod epoch_loop;
pub mod error;
pub mod experiment;
pub mod metrics;
pub mod settings;
pub mod util;

pub use clipping::{clip_grad_norm, global_grad_norm};
pub use driver::{evaluate, train, TrainConfig, TrainOutcome};
pub use epoch_loop::{
    run_epochs, CancelToken, EarlyStopping, EpochReport, EpochRunner, LoopSummary, StopReason,
    StoppingDecision,
};
pub use error::{TrainError, TrainResult};
pub use experiment::{load_checkpoint, run_experiment, save_checkpoint, FoldResult, ModelKind};
pub use metrics::{confusion, error_rate, f1, DetectionCounts, DetectionScores};
pub use settings::Settings;
pub use util::{run_train, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
