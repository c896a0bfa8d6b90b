use crate::{env_optional, env_parse, ConfigError, FromEnv};

const DEFAULT_HOST: &str = "localhost";

/// Redis connection settings for the job store.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub uri: String,
    /// Connection attempts made at startup before giving up
    pub connect_retries: u32,
}

impl RedisConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connect_retries: 5,
        }
    }
}

impl FromEnv for RedisConfig {
    /// Reads `REDIS_URL`, falling back to `REDIS_HOST` (a URL, or a bare host
    /// combined with `REDIS_PORT`). With neither set, `localhost:6379`.
    fn from_env() -> Result<Self, ConfigError> {
        let uri = match env_optional("REDIS_URL") {
            Some(url) => url,
            None => {
                let host = env_optional("REDIS_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
                if host.contains("://") {
                    host
                } else {
                    format!("redis://{}:{}", host, env_parse::<u16>("REDIS_PORT", 6379)?)
                }
            }
        };

        Ok(Self {
            uri,
            connect_retries: env_parse("REDIS_CONNECT_RETRIES", 5)?,
        })
    }
}
