pub mod errors;
pub mod models;
pub mod types;

// Re-export foundation crates so downstream crates share one version.
pub use chrono;
pub use hex;
pub use indexmap;
pub use log;
pub use parking_lot;
pub use serde;
pub use serde_json;
pub use serde_yaml;
pub use thiserror;
pub use uuid;

#[cfg(test)]
mod tests;
