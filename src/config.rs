use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::classifier::ModelOptions;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MODEL_PATH: &str = "models/pneumonia_model.onnx";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_HIDDEN_UNITS: usize = 128;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub model: ModelOptions,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse(&lookup, "PORT")?.unwrap_or(DEFAULT_PORT);
        let max_upload_bytes =
            parse(&lookup, "MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let model_path = lookup("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));
        let placeholder_hidden_units =
            parse(&lookup, "PLACEHOLDER_HIDDEN_UNITS")?.unwrap_or(DEFAULT_HIDDEN_UNITS);
        let placeholder_seed = parse(&lookup, "PLACEHOLDER_SEED")?;

        Ok(Config {
            host,
            port,
            max_upload_bytes,
            model: ModelOptions {
                model_path,
                placeholder_hidden_units,
                placeholder_seed,
            },
        })
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
    }
}
