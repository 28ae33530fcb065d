//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

use anyhow::Context as _;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Tamamo configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (SQLite database, history payloads).
    pub data_dir: PathBuf,

    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,

    /// Slack credentials.
    pub slack: SlackConfig,

    /// LLM provider configuration.
    pub llm: LlmConfig,

    /// Reply display settings.
    pub display: DisplayConfig,
}

/// Slack credentials. Both tokens are needed to run the Socket Mode bot.
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`).
    pub bot_token: Option<String>,

    /// App-level token (`xapp-...`) for Socket Mode.
    pub app_token: Option<String>,
}

/// Which wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    Anthropic,
    OpenaiCompletions,
}

/// A single configured LLM provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_type: ApiType,
    pub base_url: String,
    pub api_key: String,
}

/// LLM provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Providers by name (e.g. "anthropic", "openai", "openrouter").
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Default model as `provider/model`. Serves threads with no explicit
    /// model and is the fallback when a requested provider can't be built.
    pub default_model: Option<String>,

    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,

    /// Max output tokens per generation.
    pub max_tokens: u32,
}

impl LlmConfig {
    /// Whether any provider is available at all.
    pub fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Split the default model into `(provider, model)`.
    pub fn default_route(&self) -> Option<(&str, &str)> {
        self.default_model.as_deref().map(split_model_name)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            default_model: None,
            request_timeout_secs: 120,
            max_tokens: 4096,
        }
    }
}

/// Reply display configuration.
#[derive(Debug, Clone, Default)]
pub struct DisplayConfig {
    /// Base URL serving agent images. Display overrides are only used when set.
    pub image_base_url: Option<String>,
}

/// Split `provider/model` into its components. A bare model name is assumed
/// to be an Anthropic model.
pub fn split_model_name(model_name: &str) -> (&str, &str) {
    model_name.split_once('/').unwrap_or(("anthropic", model_name))
}

// -- TOML file shape --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    #[serde(default)]
    slack: TomlSlackConfig,
    #[serde(default)]
    llm: TomlLlmConfig,
    #[serde(default)]
    display: TomlDisplayConfig,
}

#[derive(Debug, Default, Deserialize)]
struct TomlSlackConfig {
    bot_token: Option<String>,
    app_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlLlmConfig {
    default_model: Option<String>,
    request_timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
    #[serde(default)]
    providers: BTreeMap<String, TomlProviderConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlProviderConfig {
    api_type: ApiType,
    base_url: Option<String>,
    api_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct TomlDisplayConfig {
    image_base_url: Option<String>,
}

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        let config = Self::resolve(TomlConfig::default(), &env_lookup)?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load from a TOML config file, with environment overrides applied on top.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: std::sync::Arc::new(error),
        })?;
        let config = Self::from_toml_str(&content, &env_lookup)?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Parse TOML content, resolving `env:` references and overrides through `env`.
    pub fn from_toml_str(content: &str, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        Self::resolve(toml_config, env)
    }

    fn resolve(toml_config: TomlConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("TAMAMO_DATA_DIR")
            .map(PathBuf::from)
            .or(toml_config.data_dir)
            .unwrap_or_else(Self::default_data_dir);

        let slack = SlackConfig {
            bot_token: env("SLACK_BOT_TOKEN")
                .or(resolve_secret(toml_config.slack.bot_token, env)?),
            app_token: env("SLACK_APP_TOKEN")
                .or(resolve_secret(toml_config.slack.app_token, env)?),
        };

        let mut providers = BTreeMap::new();
        for (name, provider) in toml_config.llm.providers {
            let api_key = resolve_secret(Some(provider.api_key), env)?.unwrap_or_default();
            let base_url = provider.base_url.unwrap_or_else(|| match provider.api_type {
                ApiType::Anthropic => DEFAULT_ANTHROPIC_BASE_URL.into(),
                ApiType::OpenaiCompletions => DEFAULT_OPENAI_BASE_URL.into(),
            });
            providers.insert(
                name,
                ProviderConfig {
                    api_type: provider.api_type,
                    base_url,
                    api_key,
                },
            );
        }

        // Well-known keys in the environment register a provider when the
        // file doesn't already define one under that name.
        for (name, var, api_type, base_url) in [
            (
                "anthropic",
                "ANTHROPIC_API_KEY",
                ApiType::Anthropic,
                DEFAULT_ANTHROPIC_BASE_URL,
            ),
            (
                "openai",
                "OPENAI_API_KEY",
                ApiType::OpenaiCompletions,
                DEFAULT_OPENAI_BASE_URL,
            ),
        ] {
            if let Some(api_key) = env(var) {
                providers
                    .entry(name.to_string())
                    .or_insert_with(|| ProviderConfig {
                        api_type,
                        base_url: base_url.to_string(),
                        api_key,
                    });
            }
        }

        let default_model = env("TAMAMO_DEFAULT_MODEL")
            .or(toml_config.llm.default_model)
            .or_else(|| default_model_for(&providers));

        let llm = LlmConfig {
            providers,
            default_model,
            request_timeout_secs: toml_config.llm.request_timeout_secs.unwrap_or(120),
            max_tokens: toml_config.llm.max_tokens.unwrap_or(4096),
        };

        if let Some((provider, _)) = llm.default_route()
            && !llm.providers.contains_key(provider)
        {
            return Err(ConfigError::Invalid(format!(
                "default model references unknown provider '{provider}'"
            ))
            .into());
        }

        let display = DisplayConfig {
            image_base_url: env("TAMAMO_IMAGE_BASE_URL")
                .or(toml_config.display.image_base_url)
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        };

        Ok(Self {
            data_dir,
            log_dir: toml_config.log_dir,
            slack,
            llm,
            display,
        })
    }

    /// Default data directory (`<platform data dir>/tamamo`).
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("tamamo"))
            .unwrap_or_else(|| PathBuf::from("./data"))
    }

    fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!(
                "failed to create data directory: {}",
                self.data_dir.display()
            )
        })?;
        Ok(())
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("tamamo.db")
    }

    /// Get the directory holding serialized conversation history.
    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Resolve `env:VAR_NAME` references; literal values pass through.
fn resolve_secret(
    raw: Option<String>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Option<String>> {
    match raw {
        Some(value) => match value.strip_prefix("env:") {
            Some(var_name) => env(var_name).map(Some).ok_or_else(|| {
                ConfigError::MissingKey(format!("environment variable {var_name}")).into()
            }),
            None if value.is_empty() => Ok(None),
            None => Ok(Some(value)),
        },
        None => Ok(None),
    }
}

fn default_model_for(providers: &BTreeMap<String, ProviderConfig>) -> Option<String> {
    if providers.contains_key("anthropic") {
        Some("anthropic/claude-sonnet-4-20250514".into())
    } else if providers.contains_key("openai") {
        Some("openai/gpt-4.1".into())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_leaves_llm_unconfigured() {
        let config = Config::from_toml_str("data_dir = \"/tmp/tamamo\"", &env_from(&[]))
            .expect("config should parse");

        assert!(!config.llm.is_configured());
        assert!(config.llm.default_route().is_none());
        assert!(config.slack.bot_token.is_none());
        assert_eq!(config.sqlite_path(), PathBuf::from("/tmp/tamamo/tamamo.db"));
    }

    #[test]
    fn env_key_registers_provider_and_default_model() {
        let config = Config::from_toml_str(
            "data_dir = \"/tmp/tamamo\"",
            &env_from(&[("ANTHROPIC_API_KEY", "sk-ant")]),
        )
        .expect("config should parse");

        let provider = &config.llm.providers["anthropic"];
        assert_eq!(provider.api_type, ApiType::Anthropic);
        assert_eq!(provider.api_key, "sk-ant");
        assert_eq!(
            config.llm.default_route(),
            Some(("anthropic", "claude-sonnet-4-20250514"))
        );
    }

    #[test]
    fn file_providers_resolve_env_references() {
        let content = r#"
            data_dir = "/tmp/tamamo"

            [llm]
            default_model = "openrouter/anthropic/claude-sonnet-4"

            [llm.providers.openrouter]
            api_type = "openai_completions"
            base_url = "https://openrouter.ai/api/"
            api_key = "env:OPENROUTER_API_KEY"

            [display]
            image_base_url = "https://images.example.com/"
        "#;

        let config =
            Config::from_toml_str(content, &env_from(&[("OPENROUTER_API_KEY", "or-key")]))
                .expect("config should parse");

        let provider = &config.llm.providers["openrouter"];
        assert_eq!(provider.api_key, "or-key");
        assert_eq!(
            config.llm.default_route(),
            Some(("openrouter", "anthropic/claude-sonnet-4"))
        );
        assert_eq!(
            config.display.image_base_url.as_deref(),
            Some("https://images.example.com")
        );
    }

    #[test]
    fn missing_env_reference_is_an_error() {
        let content = r#"
            [slack]
            bot_token = "env:SLACK_TOKEN_THAT_IS_NOT_SET"
        "#;

        let error = Config::from_toml_str(content, &env_from(&[]))
            .expect_err("unset env reference must fail");
        assert!(error.to_string().contains("SLACK_TOKEN_THAT_IS_NOT_SET"));
    }

    #[test]
    fn default_model_must_name_a_known_provider() {
        let content = r#"
            [llm]
            default_model = "mystery/model-x"
        "#;

        let error = Config::from_toml_str(content, &env_from(&[("OPENAI_API_KEY", "sk")]))
            .expect_err("unknown default provider must fail");
        assert!(error.to_string().contains("unknown provider 'mystery'"));
    }

    #[test]
    fn bare_model_names_default_to_anthropic() {
        assert_eq!(split_model_name("claude-3"), ("anthropic", "claude-3"));
        assert_eq!(split_model_name("openai/gpt-4.1"), ("openai", "gpt-4.1"));
    }
}
