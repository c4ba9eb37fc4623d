use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::Module;
use clap::Parser;
use data_contracts::DatasetSplit;
use models::{Crnn, SedClassifier, TfCrnn};
use sed_dataset::build_loader;
use training::util::{init_tracing, validate_backend_choice, BackendKind};
use training::{evaluate, load_checkpoint, ModelKind, Settings, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a trained checkpoint (frame-level F1 and error rate)"
)]
struct Args {
    /// Settings file used for training (TOML).
    #[arg(long = "config-file", alias = "config", default_value = "settings/main_settings.toml")]
    config_file: PathBuf,
    /// Evaluate the baseline CRNN checkpoint.
    #[arg(long, default_value_t = false)]
    baseline: bool,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Split to evaluate (training, validation or testing).
    #[arg(long, default_value = "testing")]
    split: DatasetSplit,
    /// Fold to evaluate (real-life data).
    #[arg(long)]
    fold: Option<u8>,
    /// Checkpoint path (defaults to the path training writes for this fold).
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

fn score<M: SedClassifier<TrainBackend> + Module<TrainBackend>>(
    model: M,
    args: &Args,
    settings: &Settings,
    ckpt: &Path,
) -> anyhow::Result<()> {
    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let model = load_checkpoint(model, ckpt, &device)?;
    let loader = build_loader(&settings.data_loader, args.split, args.fold)
        .with_context(|| format!("failed to build {} loader", args.split))?;
    let scores = evaluate::<TrainBackend, _>(&model, &loader, &device)?;
    println!(
        "{} ({} batches): F1 {:.4}  ER {:.4}",
        args.split,
        loader.len(),
        scores.f1,
        scores.error_rate
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    validate_backend_choice(args.backend)?;
    let settings = Settings::load(&args.config_file)?;
    let fold = match (settings.data_loader.data_version.uses_folds(), args.fold) {
        (true, None) => {
            anyhow::bail!("--fold is required for {}", settings.data_loader.data_version)
        }
        (_, fold) => fold,
    };

    let kind = ModelKind::from_baseline_flag(args.baseline);
    let ckpt = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| settings.checkpoint_path(&kind.checkpoint_name(&settings), fold));
    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    match kind {
        ModelKind::TfCrnn => {
            let model = TfCrnn::<TrainBackend>::new(&settings.model, &device)?;
            score(model, &args, &settings, &ckpt)
        }
        ModelKind::Crnn => {
            let model = Crnn::<TrainBackend>::new(&settings.model, &device)?;
            score(model, &args, &settings, &ckpt)
        }
    }
}
