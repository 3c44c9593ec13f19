use std::env;
use std::time::Duration;
use crate::error::{AppError, Result};
use dotenvy::dotenv;
use url::Url;

/// Public Space hosting the face2comic / comic2face models.
pub const DEFAULT_API_URL: &str = "https://kaitdev-api-model-ai.hf.space";

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: Url,
    pub timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists, ignore if it doesn't
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. `load` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw_url = lookup("KAPROS_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = parse_api_url(&raw_url)?;

        let timeout_secs = match lookup("KAPROS_TIMEOUT_SECS") {
            Some(v) => match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => return Err(AppError::config(format!("KAPROS_TIMEOUT_SECS must be a positive number of seconds, got '{}'", v))),
            },
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Returns a copy pointing at a different service URL.
    pub fn with_api_url(mut self, raw: &str) -> Result<Self> {
        self.api_url = parse_api_url(raw)?;
        Ok(self)
    }
}

fn parse_api_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AppError::config(format!("Invalid API URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AppError::config(format!("API URL must be http or https, got '{}'", other))),
    }
}
