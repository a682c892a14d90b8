//! Shared configuration types for the hx terminal flight recorder.

mod config;

pub use config::{
    load_config, Config, ConfigError, ConfigResult, S3Params, StoreType, VaultConfig,
};
