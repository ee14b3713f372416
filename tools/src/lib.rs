//! CLI tools for running a gateway.
mod config;

pub use config::{decode_json, AppConfig};
