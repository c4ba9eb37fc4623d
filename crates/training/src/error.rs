use models::ModelError;
use sed_dataset::SedDatasetError;
use std::path::PathBuf;
use thiserror::Error;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("failed to read settings {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    Dataset(#[from] SedDatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("training batch {batch} carries no labels")]
    MissingLabels { batch: usize },
    #[error("loader `{0}` yielded no batches")]
    EmptyLoader(&'static str),
    #[error("checkpoint error at {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("pass cancelled before completion")]
    Cancelled,
}

impl TrainError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        TrainError::InvalidSettings(msg.into())
    }
}
