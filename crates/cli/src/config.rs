//! Configuration loading from fsagent.toml.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `FSAGENT_*`
//! environment variables, command-line flags.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "fsagent.toml";

const DEFAULT_MODEL_URL: &str = "http://localhost:11434/api/chat";
const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_TOOLHOST_URL: &str = "http://127.0.0.1:3333/mcp";
const DEFAULT_PORT: u16 = 3333;
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that manages files. \
    Use the available tools to create, read, update, append to, delete and list files. \
    Answer concisely once you have what you need.";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub toolhost: ToolhostConfig,
    pub driver: DriverConfig,
}

/// Settings for `fsagent serve`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolhostConfig {
    pub host: IpAddr,
    pub port: u16,

    /// Base for relative tool paths; the process cwd when unset.
    pub workdir: Option<PathBuf>,

    pub tool_timeout_secs: u64,

    /// Zero disables idle eviction.
    pub idle_timeout_secs: u64,

    pub sweep_interval_secs: u64,
}

impl Default for ToolhostConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            workdir: None,
            tool_timeout_secs: 30,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl ToolhostConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Settings for `fsagent chat`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Chat endpoint of an Ollama-compatible server.
    pub model_url: String,
    pub model: String,
    pub toolhost_url: String,
    pub system_prompt: Option<String>,
    pub model_timeout_secs: u64,

    /// Kept above the toolhost's `tool_timeout_secs` so a slow tool is
    /// reported by the toolhost instead of timing out locally.
    pub tool_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            model_url: DEFAULT_MODEL_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            toolhost_url: DEFAULT_TOOLHOST_URL.to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            model_timeout_secs: 120,
            tool_timeout_secs: 35,
        }
    }
}

impl DriverConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load an explicit file, or `fsagent.toml` if present, or defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).exists() => Self::load(CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    /// Apply `FSAGENT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("FSAGENT_MODEL_URL") {
            self.driver.model_url = url;
        }
        if let Some(model) = lookup("FSAGENT_MODEL") {
            self.driver.model = model;
        }
        if let Some(url) = lookup("FSAGENT_TOOLHOST_URL") {
            self.driver.toolhost_url = url;
        }
        if let Some(port) = lookup("FSAGENT_PORT") {
            self.toolhost.port = port.trim().parse().map_err(|_| ConfigError::Env {
                key: "FSAGENT_PORT",
                value: port,
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.toolhost.port, 3333);
        assert_eq!(config.driver.model, "llama3.1");
        assert_eq!(config.driver.model_url, "http://localhost:11434/api/chat");
        assert_eq!(config.driver.toolhost_url, "http://127.0.0.1:3333/mcp");
        assert_eq!(config.toolhost.idle_timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn file_values_override_defaults() {
        let config = Config::parse(
            r#"
            [toolhost]
            port = 4000
            workdir = "/srv/files"
            idle_timeout_secs = 0

            [driver]
            model = "qwen2.5"
            model_timeout_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.toolhost.port, 4000);
        assert_eq!(config.toolhost.workdir, Some(PathBuf::from("/srv/files")));
        assert_eq!(config.toolhost.idle_timeout(), None);
        assert_eq!(config.driver.model, "qwen2.5");
        assert_eq!(config.driver.model_timeout(), Duration::from_secs(10));
        assert_eq!(config.driver.tool_timeout_secs, 35);
    }

    #[test]
    fn driver_waits_longer_than_the_toolhost() {
        let config = Config::default();
        assert!(config.driver.tool_timeout() > config.toolhost.tool_timeout());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::parse("[toolhost\nport = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FSAGENT_MODEL", "mistral"),
            ("FSAGENT_TOOLHOST_URL", "http://10.0.0.2:9000/mcp"),
            ("FSAGENT_PORT", "9000"),
        ]);
        let mut config = Config::parse("[driver]\nmodel = \"qwen2.5\"").unwrap();
        config
            .apply_env_with(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.driver.model, "mistral");
        assert_eq!(config.driver.toolhost_url, "http://10.0.0.2:9000/mcp");
        assert_eq!(config.toolhost.port, 9000);
        assert_eq!(config.driver.model_url, "http://localhost:11434/api/chat");
    }

    #[test]
    fn bad_port_in_environment_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env_with(|key| (key == "FSAGENT_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "FSAGENT_PORT", .. }));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::discover(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
