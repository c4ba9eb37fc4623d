//! TOML experiment settings.

use std::fs;
use std::path::{Path, PathBuf};

use models::{CrnnConfig, SamplingSchedule};
use sed_dataset::{DataLoaderConfig, FOLDS};
use serde::{Deserialize, Serialize};

use crate::driver::TrainConfig;
use crate::error::{TrainError, TrainResult};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub data_loader: DataLoaderConfig,
    pub model: CrnnConfig,
    pub optimizer: OptimizerSettings,
    pub training: TrainingSettings,
    pub tf: TeacherForcingSettings,
    pub output: OutputSettings,
    pub experiment: ExperimentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub lr: f64,
    /// Gradient norm limit; `0` disables clipping.
    pub grad_norm: f32,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            grad_norm: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub patience: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 300,
            patience: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeacherForcingSettings {
    pub gamma_factor: f64,
    pub mul_factor: f64,
    pub min_prob: f64,
    pub max_prob: f64,
    /// Epochs the schedule is held at `max_prob`.
    pub apply_after_epochs: usize,
    pub seed: Option<u64>,
}

impl Default for TeacherForcingSettings {
    fn default() -> Self {
        Self {
            gamma_factor: 12.0,
            mul_factor: 4.0,
            min_prob: 0.05,
            max_prob: 0.95,
            apply_after_epochs: 0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub states_path: String,
    pub model_name: String,
    pub save_model: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
            states_path: "states".into(),
            model_name: "tf_crnn".into(),
            save_model: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    /// Folds to run for real-life data; ignored for synthetic data.
    pub folds: Vec<u8>,
    pub seed: Option<u64>,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            folds: FOLDS.collect(),
            seed: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> TrainResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| TrainError::SettingsIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings = toml::from_str(&raw).map_err(|e| TrainError::SettingsParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> TrainResult<()> {
        let dl = &self.data_loader;
        if dl.batch_size == 0 {
            return Err(TrainError::invalid("data_loader.batch_size must be non-zero"));
        }
        if dl.seq_len == 0 {
            return Err(TrainError::invalid("data_loader.seq_len must be non-zero"));
        }
        if dl.data_version.requires_scene()
            && dl.scene.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            return Err(TrainError::invalid(format!(
                "data_loader.scene is required for {}",
                dl.data_version
            )));
        }
        if dl.data_version.uses_folds() {
            if self.experiment.folds.is_empty() {
                return Err(TrainError::invalid(format!(
                    "experiment.folds is empty but {} is fold-based",
                    dl.data_version
                )));
            }
            if let Some(bad) = self.experiment.folds.iter().find(|f| !FOLDS.contains(f)) {
                return Err(TrainError::invalid(format!(
                    "experiment.folds contains {bad}, expected 1..=4"
                )));
            }
        }
        self.model.validate()?;
        if self.optimizer.lr.is_nan() || self.optimizer.lr <= 0.0 {
            return Err(TrainError::invalid("optimizer.lr must be positive"));
        }
        if self.optimizer.grad_norm < 0.0 {
            return Err(TrainError::invalid("optimizer.grad_norm must not be negative"));
        }
        if self.training.epochs == 0 {
            return Err(TrainError::invalid("training.epochs must be non-zero"));
        }
        if self.training.patience == 0 {
            return Err(TrainError::invalid("training.patience must be non-zero"));
        }
        self.schedule()?;
        if self.output.model_name.trim().is_empty() {
            return Err(TrainError::invalid("output.model_name must not be empty"));
        }
        Ok(())
    }

    /// Sampling schedule before the batch counter is known.
    pub fn schedule(&self) -> TrainResult<SamplingSchedule> {
        let tf = &self.tf;
        Ok(SamplingSchedule::new(
            tf.gamma_factor,
            tf.mul_factor,
            tf.min_prob,
            tf.max_prob,
        )?)
    }

    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            epochs: self.training.epochs,
            patience: self.training.patience,
            learning_rate: self.optimizer.lr,
            grad_clip: Some(self.optimizer.grad_norm).filter(|g| *g > 0.0),
        }
    }

    /// Folds to run; `[None]` for synthetic data.
    pub fn folds(&self) -> Vec<Option<u8>> {
        if self.data_loader.data_version.uses_folds() {
            self.experiment.folds.iter().copied().map(Some).collect()
        } else {
            vec![None]
        }
    }

    /// `<dir>/<states_path>/model_<model_name>_fold_<fold>.bin`.
    pub fn checkpoint_path(&self, model_name: &str, fold: Option<u8>) -> PathBuf {
        let fold = fold.map_or_else(|| "none".to_string(), |f| f.to_string());
        self.output
            .dir
            .join(&self.output.states_path)
            .join(format!("model_{model_name}_fold_{fold}.bin"))
    }
}
