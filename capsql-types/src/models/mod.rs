pub mod config;

pub use config::{
    Config, DatabaseConfig, DissectorConfig, InputConfig, RulesConfig, WriterConfig,
};
