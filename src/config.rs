use std::time::Duration;
use thiserror::Error;

const DEFAULT_PREFIX: &str = "!";
const DEFAULT_DATABASE: &str = "lobby_draft";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for environment variable {name}: `{value}`")]
    InvalidEnvVar { name: &'static str, value: String },
}

pub struct Config {
    pub discord_token: String,
    pub command_prefix: String,

    /// No connection string means the bot keeps everything in memory.
    pub mongodb_connection: Option<String>,
    pub mongodb_database: String,

    pub session_idle_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // zero would make the eviction interval panic
        let session_idle_timeout = match var("SESSION_IDLE_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    return Err(ConfigError::InvalidEnvVar {
                        name: "SESSION_IDLE_TIMEOUT_SECS",
                        value: raw,
                    })
                }
            },
            None => None,
        };

        Ok(Self {
            discord_token: var("DISCORD_TOKEN").ok_or(ConfigError::MissingEnvVar("DISCORD_TOKEN"))?,
            command_prefix: var("COMMAND_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_owned()),
            mongodb_connection: var("MONGODB_CONNECTION"),
            mongodb_database: var("MONGODB_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
            session_idle_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn token_is_required() {
        let err = load(&[]).err().unwrap();
        assert!(matches!(err, ConfigError::MissingEnvVar("DISCORD_TOKEN")));
        let err = load(&[("DISCORD_TOKEN", "  ")]).err().unwrap();
        assert!(matches!(err, ConfigError::MissingEnvVar("DISCORD_TOKEN")));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DISCORD_TOKEN", "abc")]).unwrap();
        assert_eq!(config.discord_token, "abc");
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.mongodb_connection, None);
        assert_eq!(config.mongodb_database, "lobby_draft");
        assert_eq!(config.session_idle_timeout, None);
    }

    #[test]
    fn idle_timeout_must_be_positive_whole_seconds() {
        let config = load(&[
            ("DISCORD_TOKEN", "abc"),
            ("SESSION_IDLE_TIMEOUT_SECS", "3600"),
            ("COMMAND_PREFIX", "~"),
        ])
        .unwrap();
        assert_eq!(config.session_idle_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.command_prefix, "~");

        let err = load(&[
            ("DISCORD_TOKEN", "abc"),
            ("SESSION_IDLE_TIMEOUT_SECS", "soon"),
        ])
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ConfigError::InvalidEnvVar { name: "SESSION_IDLE_TIMEOUT_SECS", .. }
        ));

        let err = load(&[
            ("DISCORD_TOKEN", "abc"),
            ("SESSION_IDLE_TIMEOUT_SECS", "0"),
        ])
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ConfigError::InvalidEnvVar { name: "SESSION_IDLE_TIMEOUT_SECS", .. }
        ));
    }
}
