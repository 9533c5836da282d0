use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// Service credentials and endpoints for the external collaborators.
///
/// Values are read from an optional `config` file in the working directory and
/// then from the environment (`OPENAI_API_KEY`, `NLI_ENDPOINT`, ...).
#[derive(Clone, Deserialize, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default)]
    pub nli_endpoint: Option<String>,
    #[serde(default)]
    pub nli_api_key: Option<String>,
    #[serde(default = "default_nli_max_retries")]
    pub nli_max_retries: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

const fn default_nli_max_retries() -> usize {
    3
}

impl AppConfig {
    pub fn require_openai_key(&self) -> Result<&str, AppError> {
        self.openai_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation(
                    "OPENAI_API_KEY must be set to use the openai embedding backend".into(),
                )
            })
    }

    pub fn require_nli_endpoint(&self) -> Result<(&str, Option<&str>), AppError> {
        let endpoint = self
            .nli_endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation("NLI_ENDPOINT must be set to run the NLI evaluation".into())
            })?;

        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(AppError::Validation(format!(
                "NLI_ENDPOINT must be an http(s) URL (got {endpoint})"
            )));
        }

        Ok((endpoint, self.nli_api_key.as_deref()))
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nli_endpoint_must_be_http_url() {
        let config = AppConfig {
            nli_endpoint: Some("ftp://models.example".into()),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.require_nli_endpoint(),
            Err(AppError::Validation(_))
        ));

        let config = AppConfig {
            nli_endpoint: Some("https://models.example/score".into()),
            nli_api_key: Some("secret".into()),
            ..AppConfig::default()
        };
        let (endpoint, key) = config.require_nli_endpoint().expect("valid endpoint");
        assert_eq!(endpoint, "https://models.example/score");
        assert_eq!(key, Some("secret"));
    }

    #[test]
    fn blank_openai_key_is_rejected() {
        let config = AppConfig {
            openai_api_key: Some("   ".into()),
            ..AppConfig::default()
        };
        assert!(config.require_openai_key().is_err());
    }
}
