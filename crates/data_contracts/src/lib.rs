//! Shared data contracts for sound event detection feature stores.

pub mod dataset;
pub mod store;

pub use dataset::{DataVersion, DatasetSplit};
pub use store::{
    ContractError, Endianness, FeatureDType, FeatureManifest, StoreLayout,
    FEATURE_MANIFEST_SCHEMA_VERSION,
};
