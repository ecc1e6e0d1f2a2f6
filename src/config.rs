use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::persona::PersonaRegistry;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:9900/platform/dify";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub db_path: PathBuf,
    pub bind: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub user_id: String,
    pub personas_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend_url = get("AGORA_BACKEND_URL")
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        // We default to ~/.agora/agora.db
        let db_path = match get("AGORA_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home_dir = get("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home_dir).join(".agora").join("agora.db")
            }
        };

        let port = match get("AGORA_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("AGORA_PORT is not a valid port: {}", raw))?,
            None => DEFAULT_PORT,
        };

        let timeout_secs = match get("AGORA_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw.parse().with_context(|| {
                format!("AGORA_REQUEST_TIMEOUT_SECS is not a number: {}", raw)
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            backend_url,
            db_path,
            bind: get("AGORA_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            request_timeout: Duration::from_secs(timeout_secs),
            user_id: get("AGORA_USER_ID").unwrap_or_else(|| "anonymous".into()),
            personas_path: get("AGORA_PERSONAS").map(PathBuf::from),
        })
    }

    pub fn personas(&self) -> Result<PersonaRegistry> {
        match &self.personas_path {
            Some(path) => PersonaRegistry::from_file(path),
            None => Ok(PersonaRegistry::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/staff")])).unwrap();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.db_path, PathBuf::from("/home/staff/.agora/agora.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.user_id, "anonymous");
        assert!(config.personas_path.is_none());
    }

    #[test]
    fn overrides_are_honoured() {
        let config = Config::from_lookup(lookup(&[
            ("AGORA_BACKEND_URL", "http://backend:9900/api/"),
            ("AGORA_PORT", "8080"),
            ("AGORA_REQUEST_TIMEOUT_SECS", "5"),
            ("AGORA_USER_ID", "staff-7"),
        ]))
        .unwrap();
        assert_eq!(config.backend_url, "http://backend:9900/api");
        assert_eq!(config.port, 8080);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.user_id, "staff-7");
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = Config::from_lookup(lookup(&[("AGORA_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("AGORA_PORT"));
    }
}
