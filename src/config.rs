//! Bridge configuration.
//!
//! Loaded from a YAML file. Every key is optional; missing keys fall back to
//! the defaults below. When the file does not exist a commented template is
//! written in its place so the operator can fill in endpoints before the
//! first real start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

/// Reply sent to a group when an unauthorized user tries a command.
pub const DEFAULT_PERMISSION_DENIED_MSG: &str = "权限不足，您无权执行此命令";

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# hubbridge configuration
# Adjust the endpoints below before starting the bridge.

# GRUniChat hub
grunichat:
  url: "ws://localhost:8765/ws"           # hub WebSocket endpoint
  client_id: "QQ"                         # identity announced in the hello frame
  reconnect_interval: 5                   # seconds between connection attempts
  max_reconnect_attempts: 10              # attempts before giving up

# OneBot v11 gateway
onebot:
  websocket_url: "ws://localhost:3001/"   # OneBot WebSocket endpoint
  access_token: ""                        # sent as a bearer token when set
  reconnect_interval: 5
  max_reconnect_attempts: 10

# Logging
log:
  level: "info"                           # trace, debug, info, warn, error
  format: "text"                          # text or json
  file: ""                                # empty logs to stderr

# Message filtering
filter:
  service_groups: []                      # groups served by the bridge, empty = all
  blacklist_users: []                     # users whose messages are ignored
  filter_command_executions: false        # hide command execution events from groups

# Command routing
command:
  require_permission: true                # only authorized_users may send !!command
  authorized_users: []                    # e.g. [123456789, 987654321]
  permission_denied_msg: "权限不足，您无权执行此命令"

# Message formatting
format:
  group_message_format: "{message}"       # template for group chat forwarded to the hub

# Advisory sizing, not used by the bridge core
performance:
  message_queue_size: 1000
  worker_count: 5
  message_timeout: 10

# Bridge behavior
bridge:
  auto_reconnect: false                   # reconnect dropped sockets after startup
"#;

/// Result of loading configuration from disk.
#[derive(Debug)]
pub enum LoadOutcome {
    /// An existing file was parsed.
    Loaded(Box<Config>),
    /// No file existed; a default template was written to this path.
    Created(PathBuf),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub grunichat: HubConfig,
    pub onebot: OneBotConfig,
    pub log: LogConfig,
    pub filter: FilterConfig,
    pub command: CommandConfig,
    pub format: FormatConfig,
    pub performance: PerformanceConfig,
    pub bridge: BridgeConfig,
}

/// GRUniChat hub connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubConfig {
    pub url: String,
    /// Identity sent in the hello frame and stamped on forwarded messages.
    pub client_id: String,
    /// Seconds between connection attempts.
    pub reconnect_interval: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765/ws".to_string(),
            client_id: "onebot_adapter".to_string(),
            reconnect_interval: 5,
            max_reconnect_attempts: 10,
        }
    }
}

impl HubConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
}

/// OneBot gateway connection settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OneBotConfig {
    pub websocket_url: String,
    /// Bearer token; an empty string in the file means no token.
    #[serde(skip_serializing, deserialize_with = "deserialize_optional_token")]
    pub access_token: Option<SecretString>,
    pub reconnect_interval: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            websocket_url: "ws://localhost:5700/ws".to_string(),
            access_token: None,
            reconnect_interval: 5,
            max_reconnect_attempts: 10,
        }
    }
}

impl std::fmt::Debug for OneBotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneBotConfig")
            .field("websocket_url", &self.websocket_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("reconnect_interval", &self.reconnect_interval)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish()
    }
}

impl OneBotConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
}

fn deserialize_optional_token<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt
        .filter(|token| !token.trim().is_empty())
        .map(SecretString::from))
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Log sink settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Append logs to this file instead of stderr when non-empty.
    pub file: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: String::new(),
        }
    }
}

/// Inbound filtering settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Groups the bridge serves. Empty means every group.
    pub service_groups: Vec<i64>,
    pub blacklist_users: Vec<i64>,
    /// Drop hub events that report command executions.
    pub filter_command_executions: bool,
}

/// `!!command` permission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandConfig {
    pub require_permission: bool,
    pub authorized_users: Vec<i64>,
    pub permission_denied_msg: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            require_permission: false,
            authorized_users: Vec::new(),
            permission_denied_msg: DEFAULT_PERMISSION_DENIED_MSG.to_string(),
        }
    }
}

/// Text templates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Applied to group chat before it is forwarded; `{message}` is replaced
    /// by the message text.
    pub group_message_format: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            group_message_format: "{message}".to_string(),
        }
    }
}

/// Queue and worker sizing. Advisory only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub message_queue_size: usize,
    pub worker_count: usize,
    pub message_timeout: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            message_queue_size: 1000,
            worker_count: 5,
            message_timeout: 10,
        }
    }
}

/// Runtime behavior of the orchestrator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Reconnect a transport that drops after startup.
    pub auto_reconnect: bool,
}

impl Config {
    /// Parse configuration from YAML text.
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.fill_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, writing a default template if the
    /// file does not exist.
    ///
    /// An unreadable or unparsable file is an error; it is never replaced.
    pub fn load_or_create(path: &Path) -> crate::Result<LoadOutcome> {
        if !path.exists() {
            write_default_template(path)?;
            tracing::info!(path = %path.display(), "Created default configuration file");
            return Ok(LoadOutcome::Created(path.to_path_buf()));
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(path, &text)?;
        Ok(LoadOutcome::Loaded(Box::new(config)))
    }

    /// Replace empty values that `#[serde(default)]` cannot catch, such as
    /// keys present in the file with an empty string or zero.
    fn fill_defaults(&mut self) {
        let hub = HubConfig::default();
        if self.grunichat.url.is_empty() {
            self.grunichat.url = hub.url;
        }
        if self.grunichat.client_id.is_empty() {
            self.grunichat.client_id = hub.client_id;
        }
        if self.grunichat.reconnect_interval == 0 {
            self.grunichat.reconnect_interval = hub.reconnect_interval;
        }
        if self.grunichat.max_reconnect_attempts == 0 {
            self.grunichat.max_reconnect_attempts = hub.max_reconnect_attempts;
        }

        let onebot = OneBotConfig::default();
        if self.onebot.websocket_url.is_empty() {
            self.onebot.websocket_url = onebot.websocket_url;
        }
        if self.onebot.reconnect_interval == 0 {
            self.onebot.reconnect_interval = onebot.reconnect_interval;
        }
        if self.onebot.max_reconnect_attempts == 0 {
            self.onebot.max_reconnect_attempts = onebot.max_reconnect_attempts;
        }

        if self.log.level.is_empty() {
            self.log.level = LogConfig::default().level;
        }
        if self.format.group_message_format.is_empty() {
            self.format.group_message_format = FormatConfig::default().group_message_format;
        }
        if self.command.permission_denied_msg.is_empty() {
            self.command.permission_denied_msg = DEFAULT_PERMISSION_DENIED_MSG.to_string();
        }

        let perf = PerformanceConfig::default();
        if self.performance.message_queue_size == 0 {
            self.performance.message_queue_size = perf.message_queue_size;
        }
        if self.performance.worker_count == 0 {
            self.performance.worker_count = perf.worker_count;
        }
        if self.performance.message_timeout == 0 {
            self.performance.message_timeout = perf.message_timeout;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, url) in [
            ("grunichat.url", &self.grunichat.url),
            ("onebot.websocket_url", &self.onebot.websocket_url),
        ] {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("expected a ws:// or wss:// URL, got {url:?}"),
                });
            }
        }
        Ok(())
    }
}

fn write_default_template(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use crate::error::Error;

    fn parse(text: &str) -> Config {
        Config::from_yaml(Path::new("test.yaml"), text).unwrap()
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse("");
        assert_eq!(config.grunichat.url, "ws://localhost:8765/ws");
        assert_eq!(config.grunichat.client_id, "onebot_adapter");
        assert_eq!(config.grunichat.reconnect_interval, 5);
        assert_eq!(config.grunichat.max_reconnect_attempts, 10);
        assert_eq!(config.onebot.websocket_url, "ws://localhost:5700/ws");
        assert!(config.onebot.access_token.is_none());
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.format.group_message_format, "{message}");
        assert_eq!(config.command.permission_denied_msg, DEFAULT_PERMISSION_DENIED_MSG);
        assert_eq!(config.performance.worker_count, 5);
        assert!(!config.bridge.auto_reconnect);
    }

    #[test]
    fn test_explicit_empty_values_are_defaulted() {
        let config = parse(
            r#"
grunichat:
  url: ""
  client_id: ""
  reconnect_interval: 0
format:
  group_message_format: ""
"#,
        );
        assert_eq!(config.grunichat.url, "ws://localhost:8765/ws");
        assert_eq!(config.grunichat.client_id, "onebot_adapter");
        assert_eq!(config.grunichat.reconnect_interval, 5);
        assert_eq!(config.format.group_message_format, "{message}");
    }

    #[test]
    fn test_full_file_parses() {
        let config = parse(
            r#"
grunichat:
  url: "ws://hub:8765/ws"
  client_id: "QQ"
onebot:
  websocket_url: "wss://bot:3001/"
  access_token: "s3cret"
  max_reconnect_attempts: 3
log:
  level: "debug"
  format: "json"
filter:
  service_groups: [111, 222]
  blacklist_users: [9]
  filter_command_executions: true
command:
  require_permission: true
  authorized_users: [42]
bridge:
  auto_reconnect: true
"#,
        );
        assert_eq!(config.grunichat.client_id, "QQ");
        assert_eq!(
            config.onebot.access_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("s3cret".to_string())
        );
        assert_eq!(config.onebot.max_reconnect_attempts, 3);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.filter.service_groups, vec![111, 222]);
        assert!(config.filter.filter_command_executions);
        assert!(config.bridge.auto_reconnect);
    }

    #[test]
    fn test_blank_access_token_is_none() {
        let config = parse("onebot:\n  access_token: \"   \"\n");
        assert!(config.onebot.access_token.is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = parse("onebot:\n  access_token: \"hunter2\"\n");
        let debug = format!("{:?}", config.onebot);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = Config::from_yaml(Path::new("x.yaml"), "grunichat:\n  url: \"http://hub\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "grunichat.url"));
    }

    #[test]
    fn test_load_or_create_writes_template() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let outcome = Config::load_or_create(&path).unwrap();
        assert!(matches!(outcome, LoadOutcome::Created(ref p) if p == &path));
        assert!(path.exists());

        // The template itself must load cleanly on the next start.
        match Config::load_or_create(&path).unwrap() {
            LoadOutcome::Loaded(config) => {
                assert_eq!(config.grunichat.client_id, "QQ");
                assert!(config.command.require_permission);
                assert!(config.onebot.access_token.is_none());
            }
            LoadOutcome::Created(_) => panic!("second load should read the template"),
        }
    }

    #[test]
    fn test_corrupted_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "grunichat: [not: valid").unwrap();

        let err = Config::load_or_create(&path).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse { .. })));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "grunichat: [not: valid"
        );
    }
}
