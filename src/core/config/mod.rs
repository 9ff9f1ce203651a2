use log::warn;
use std::str::FromStr;
use std::time::Duration;

use crate::llm::GenerationOptions;
use crate::tasks::RetryPolicy;

pub const DEFAULT_QUEUE_NAME: &str = "ai-classification";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    pub queue: QueueConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// When unset, tickets live in the in-memory store.
    pub url: Option<String>,
    pub pool_size: u32,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl ClassifierConfig {
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub name: String,
    pub workers: usize,
    pub capacity: usize,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            timeout: self.timeout,
            backoff: self.backoff,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Missing keys
    /// take their defaults; malformed values are logged and replaced by
    /// the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let api_key = env.string("OPENAI_API_KEY", "");
        let mut enabled = env.flag("OPENAI_CLASSIFY_ENABLED", true);
        if enabled && api_key.trim().is_empty() {
            warn!("OPENAI_CLASSIFY_ENABLED is set but OPENAI_API_KEY is empty; using fallback classification");
            enabled = false;
        }

        let temperature: f32 = env.parse("OPENAI_TEMPERATURE", 0.1);
        if !(0.0..=2.0).contains(&temperature) {
            anyhow::bail!("OPENAI_TEMPERATURE must be between 0 and 2, got {temperature}");
        }

        Ok(AppConfig {
            server: ServerConfig {
                host: env.string("SERVER_HOST", "0.0.0.0"),
                port: env.parse("SERVER_PORT", 8080),
            },
            database: DatabaseConfig {
                url: env.optional("DATABASE_URL"),
                pool_size: env.parse("DATABASE_POOL_SIZE", 10),
            },
            classifier: ClassifierConfig {
                enabled,
                api_key,
                base_url: env.string("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
                model: env.string("OPENAI_MODEL", DEFAULT_OPENAI_MODEL),
                max_tokens: env.parse("OPENAI_MAX_TOKENS", 150),
                temperature,
                request_timeout: Duration::from_secs(env.parse("OPENAI_REQUEST_TIMEOUT_SECS", 30)),
            },
            queue: QueueConfig {
                name: env.string("CLASSIFICATION_QUEUE", DEFAULT_QUEUE_NAME),
                workers: env.parse::<usize>("CLASSIFICATION_WORKERS", 4).max(1),
                capacity: env.parse::<usize>("QUEUE_CAPACITY", 1000).max(1),
                max_attempts: env.parse::<u32>("CLASSIFICATION_MAX_ATTEMPTS", 3).max(1),
                timeout: Duration::from_secs(env.parse("CLASSIFICATION_TIMEOUT_SECS", 60)),
                backoff: Duration::from_millis(env.parse("CLASSIFICATION_BACKOFF_MS", 1000)),
            },
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.optional(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => default,
            Some(v) if v == "true" || v == "1" => true,
            Some(v) if v == "false" || v == "0" => false,
            Some(v) => {
                warn!("Ignoring malformed {key}={v}; using default");
                default
            }
        }
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.optional(key) {
            None => default,
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!("Ignoring malformed {key}={raw}; using default");
                    default
                }
            },
        }
    }
}
