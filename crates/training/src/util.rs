use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::epoch_loop::{CancelToken, StopReason};
use crate::experiment::{run_experiment, ModelKind};
use crate::settings::Settings;
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train the sound event detector (teacher forcing by default, --baseline for plain CRNN)"
)]
pub struct TrainArgs {
    /// Settings file (TOML).
    #[arg(long = "config-file", alias = "config", default_value = "settings/main_settings.toml")]
    pub config_file: PathBuf,
    /// Train the baseline CRNN instead of the teacher-forcing model.
    #[arg(long, default_value_t = false)]
    pub baseline: bool,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Run only this fold (real-life data).
    #[arg(long)]
    pub fold: Option<u8>,
    /// Override the experiment seed.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Override the epoch budget.
    #[arg(long)]
    pub epochs: Option<usize>,
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Ctrl-C flips the returned token; the training loop notices between batches.
pub fn install_interrupt_handler() -> anyhow::Result<CancelToken> {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        if !handle.is_cancelled() {
            eprintln!("interrupt received; finishing with the best model so far");
        }
        handle.cancel();
    })?;
    Ok(cancel)
}

fn apply_overrides(settings: &mut Settings, args: &TrainArgs) {
    if let Some(fold) = args.fold {
        settings.experiment.folds = vec![fold];
    }
    if let Some(seed) = args.seed {
        settings.experiment.seed = Some(seed);
        settings.data_loader.seed.get_or_insert(seed);
        settings.tf.seed.get_or_insert(seed);
    }
    if let Some(epochs) = args.epochs {
        settings.training.epochs = epochs;
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let mut settings = Settings::load(&args.config_file)?;
    apply_overrides(&mut settings, &args);
    settings.validate()?;

    let kind = ModelKind::from_baseline_flag(args.baseline);
    let cancel = install_interrupt_handler()?;
    let device = <crate::ADBackend as burn::tensor::backend::Backend>::Device::default();
    tracing::info!(
        backend = std::any::type_name::<TrainBackend>(),
        device = ?device,
        config = %args.config_file.display(),
        "starting {} experiment",
        if args.baseline { "baseline" } else { "teacher forcing" }
    );

    let results = run_experiment::<crate::ADBackend>(&settings, kind, &device, &cancel)?;
    for r in &results {
        tracing::info!(
            fold = ?r.fold,
            stop = ?r.stop_reason,
            best_epoch = ?r.best_epoch,
            checkpoint = ?r.checkpoint,
            "fold summary: F1 {:.4}, ER {:.4}",
            r.test.f1,
            r.test.error_rate
        );
    }
    if results.iter().any(|r| r.stop_reason == StopReason::Interrupted) {
        tracing::info!("experiment cut short by cancellation");
    }
    Ok(())
}
