pub mod global;
pub mod loader;

pub use global::{
    GlobalConfig, IngestConfig, StorageBackend, StorageConfig, StoreConfig, SystemConfig,
};
pub use loader::ConfigLoader;
