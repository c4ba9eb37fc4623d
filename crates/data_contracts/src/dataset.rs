use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::store::ContractError;

/// Partition of a dataset served by a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSplit {
    Training,
    Validation,
    Testing,
}

impl DatasetSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSplit::Training => "training",
            DatasetSplit::Validation => "validation",
            DatasetSplit::Testing => "testing",
        }
    }
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSplit {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "training" => Ok(DatasetSplit::Training),
            "validation" => Ok(DatasetSplit::Validation),
            "testing" => Ok(DatasetSplit::Testing),
            other => Err(ContractError::UnknownSplit(other.to_string())),
        }
    }
}

/// Which recording corpus the features were extracted from.
///
/// Synthetic data ships pre-sequenced per split. Both real-life corpora are
/// cross-validated over four folds and stored as flat frame matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataVersion {
    Synthetic,
    RealLife2016,
    RealLife2017,
}

impl DataVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataVersion::Synthetic => "synthetic",
            DataVersion::RealLife2016 => "real_life_2016",
            DataVersion::RealLife2017 => "real_life_2017",
        }
    }

    /// Fold-based corpora evaluate on the fold's validation data.
    pub fn uses_folds(&self) -> bool {
        !matches!(self, DataVersion::Synthetic)
    }

    pub fn requires_scene(&self) -> bool {
        matches!(self, DataVersion::RealLife2016)
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataVersion {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "synthetic" => Ok(DataVersion::Synthetic),
            "real_life_2016" => Ok(DataVersion::RealLife2016),
            "real_life_2017" => Ok(DataVersion::RealLife2017),
            other => Err(ContractError::UnknownDataVersion(other.to_string())),
        }
    }
}
