use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::quiz::provider::{ProviderConfig, ResponseFormat};

const DEFAULT_PRIMARY_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_PRIMARY_MODEL: &str = "gpt-4-turbo";
const DEFAULT_MAX_TOKENS: u32 = 512;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub question_bank_path: PathBuf,
    /// Primary first.
    pub providers: Vec<ProviderConfig>,
}

/// Environment variable names for one provider slot.
struct ProviderVars {
    name: &'static str,
    key: &'static str,
    url: &'static str,
    model: &'static str,
    format: &'static str,
}

const PRIMARY: ProviderVars = ProviderVars {
    name: "primary",
    key: "PRIMARY_API_KEY",
    url: "PRIMARY_API_URL",
    model: "PRIMARY_MODEL",
    format: "PRIMARY_RESPONSE_FORMAT",
};

const FALLBACK: ProviderVars = ProviderVars {
    name: "fallback",
    key: "FALLBACK_API_KEY",
    url: "FALLBACK_API_URL",
    model: "FALLBACK_MODEL",
    format: "FALLBACK_RESPONSE_FORMAT",
};

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Empty values count as unset.
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let max_tokens = parse_var(&get, "ANALYSIS_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS);
        let temperature = parse_var::<f32>(&get, "ANALYSIS_TEMPERATURE")?;
        let timeout = parse_var::<u64>(&get, "ANALYSIS_TIMEOUT_SECS")?.map(Duration::from_secs);

        let shared = |vars: &ProviderVars,
                      default_url: Option<&str>,
                      default_model: Option<&str>,
                      default_format: ResponseFormat|
         -> Result<ProviderConfig, ConfigError> {
            let credential = get(vars.key).ok_or(ConfigError::Missing(vars.key))?;
            let endpoint_url = get(vars.url)
                .or_else(|| default_url.map(str::to_string))
                .ok_or(ConfigError::Missing(vars.url))?;
            let model_id = get(vars.model)
                .or_else(|| default_model.map(str::to_string))
                .ok_or(ConfigError::Missing(vars.model))?;
            let response_format = parse_var(&get, vars.format)?.unwrap_or(default_format);
            Ok(ProviderConfig {
                name: vars.name.to_string(),
                endpoint_url,
                credential,
                model_id,
                response_format,
                max_tokens,
                temperature,
                timeout,
            })
        };

        let mut providers = vec![shared(
            &PRIMARY,
            Some(DEFAULT_PRIMARY_URL),
            Some(DEFAULT_PRIMARY_MODEL),
            ResponseFormat::BracketTagged,
        )?];

        let fallback_configured = [FALLBACK.key, FALLBACK.url, FALLBACK.model, FALLBACK.format]
            .iter()
            .any(|name| get(*name).is_some());
        if fallback_configured {
            providers.push(shared(&FALLBACK, None, None, ResponseFormat::MarkdownHeading)?);
        }

        Ok(Self {
            database_path: get("HEALTH_BOT_DB")
                .unwrap_or_else(|| "db.sqlite".to_string())
                .into(),
            question_bank_path: get("QUESTION_BANK_PATH")
                .unwrap_or_else(|| "questions.json".to_string())
                .into(),
            providers,
        })
    }
}

fn parse_var<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(name)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
