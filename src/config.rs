//! Process configuration collaborator.
//!
//! A thin shim over the environment: `.env` is loaded once, then values come
//! from `PULSEDB_*` variables. The engine itself keeps no global state; this
//! module is the only place that touches the process environment.

use once_cell::sync::Lazy;
use thiserror::Error;

static ENV: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

/// The requested configuration key is not set anywhere.
#[derive(Debug, Error)]
#[error("no configuration value for key `{0}`")]
pub struct NoKey(pub String);

fn env_name(key: &str) -> String {
    format!("PULSEDB_{}", key.to_uppercase())
}

/// Look up a configuration value, erring when the key is absent.
pub fn get_value(key: &str) -> Result<String, NoKey> {
    Lazy::force(&ENV);
    std::env::var(env_name(key)).map_err(|_| NoKey(key.to_string()))
}

/// Look up a configuration value, falling back to `default`.
pub fn get_value_or(key: &str, default: &str) -> String {
    get_value(key).unwrap_or_else(|_| default.to_string())
}
