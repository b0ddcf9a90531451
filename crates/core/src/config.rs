use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub room: RoomConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base64-encoded server URL, normally supplied by the embedding shell.
    pub address: Option<String>,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_muc_domain")]
    pub muc_domain: String,
    pub resource: Option<String>,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl ServerConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            domain: default_domain(),
            muc_domain: default_muc_domain(),
            resource: None,
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    #[serde(default = "default_room_name")]
    pub name: String,
    #[serde(default = "default_room_password")]
    pub password: Option<String>,
    pub nickname: Option<String>,
    pub history_max_stanzas: Option<u32>,
    pub history_max_chars: Option<u32>,
    pub history_seconds: Option<u32>,
    /// RFC 3339 timestamp, quoted.
    pub history_since: Option<DateTime<FixedOffset>>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            name: default_room_name(),
            password: default_room_password(),
            nickname: None,
            history_max_stanzas: None,
            history_max_chars: None,
            history_seconds: None,
            history_since: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_liveness_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_liveness_timeout_ms")]
    pub timeout_ms: u64,
    /// Ping target; falls back to `server.domain`.
    pub target: Option<String>,
}

impl LivenessConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            period_ms: default_liveness_period_ms(),
            timeout_ms: default_liveness_timeout_ms(),
            target: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_step_ms")]
    pub step_ms: u64,
    #[serde(default = "default_reconnect_ceiling_ms")]
    pub ceiling_ms: u64,
}

impl ReconnectConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            step_ms: default_reconnect_step_ms(),
            ceiling_ms: default_reconnect_ceiling_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    server: Option<String>,
    room: Option<String>,
    nickname: Option<String>,
    log_level: Option<String>,
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_muc_domain() -> String {
    "muc.localhost".to_string()
}

fn default_query_timeout_ms() -> u64 {
    8_000
}

fn default_room_name() -> String {
    "test1".to_string()
}

fn default_room_password() -> Option<String> {
    Some("secret".to_string())
}

fn default_liveness_period_ms() -> u64 {
    10_000
}

fn default_liveness_timeout_ms() -> u64 {
    1_000
}

fn default_reconnect_step_ms() -> u64 {
    1_000
}

fn default_reconnect_ceiling_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const DEFAULT_CONFIG_TOML: &str = r#"[server]
# address = "d3NzOi8vbG9jYWxob3N0OjUyODAveG1wcC13ZWJzb2NrZXQ="
domain = "localhost"
muc_domain = "muc.localhost"
# resource = "board"
query_timeout_ms = 8000

[room]
name = "test1"
password = "secret"
# nickname = "alice"
# history_max_stanzas = 20
# history_max_chars = 4096
# history_seconds = 3600
# history_since = "2026-01-01T00:00:00Z"

[liveness]
period_ms = 10000
timeout_ms = 1000
# target = "localhost"

[reconnect]
step_ms = 1000
ceiling_ms = 30000

[logging]
level = "info"

[event_bus]
channel_capacity = 1024
"#;

/// Return the resolved platform-appropriate configuration file path.
pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "board", "board") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

/// Load configuration from the platform config path, merging environment
/// variable overrides. A missing file is created with defaults.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Load configuration from a specific path. Used by `load_config()` and tests.
pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    load_config_from_with_overrides(path, config_overrides_from_env())
}

/// Parse configuration from a TOML string directly.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_with_overrides(
    path: PathBuf,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(&path)?;
            DEFAULT_CONFIG_TOML.to_string()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        server: std::env::var("BOARD_SERVER").ok(),
        room: std::env::var("BOARD_ROOM").ok(),
        nickname: std::env::var("BOARD_NICKNAME").ok(),
        log_level: std::env::var("BOARD_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(server) = overrides.server {
        config.server.address = Some(server);
    }
    if let Some(room) = overrides.room {
        config.room.name = room;
    }
    if let Some(nickname) = overrides.nickname {
        config.room.nickname = Some(nickname);
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.domain.trim().is_empty() {
        return Err(invalid("server.domain", "must not be empty"));
    }
    if config.server.muc_domain.trim().is_empty() {
        return Err(invalid("server.muc_domain", "must not be empty"));
    }
    if config.server.query_timeout_ms == 0 {
        return Err(invalid("server.query_timeout_ms", "must be greater than zero"));
    }
    if config.room.name.trim().is_empty() {
        return Err(invalid("room.name", "must not be empty"));
    }
    if matches!(&config.room.nickname, Some(nick) if nick.trim().is_empty()) {
        return Err(invalid("room.nickname", "must not be empty when set"));
    }
    if config.liveness.period_ms == 0 {
        return Err(invalid("liveness.period_ms", "must be greater than zero"));
    }
    if config.liveness.timeout_ms == 0 {
        return Err(invalid("liveness.timeout_ms", "must be greater than zero"));
    }
    if config.reconnect.step_ms > config.reconnect.ceiling_ms {
        return Err(invalid(
            "reconnect.step_ms",
            format!(
                "must not exceed reconnect.ceiling_ms ({})",
                config.reconnect.ceiling_ms
            ),
        ));
    }
    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        ));
    }

    Ok(())
}

fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    tracing::info!(path = %path.display(), "wrote default configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_without_env(toml_str: &str) -> Result<Config, ConfigError> {
        load_config_from_str_with_overrides(toml_str, ConfigOverrides::default())
    }

    // ── Parsing ───────────────────────────────────────────────────

    #[test]
    fn empty_file_yields_deployment_defaults() {
        let config = parse_without_env("").unwrap();
        assert!(config.server.address.is_none());
        assert_eq!(config.server.domain, "localhost");
        assert_eq!(config.server.muc_domain, "muc.localhost");
        assert_eq!(config.room.name, "test1");
        assert_eq!(config.room.password.as_deref(), Some("secret"));
        assert!(config.room.nickname.is_none());
        assert_eq!(config.liveness.period(), Duration::from_secs(10));
        assert_eq!(config.liveness.timeout(), Duration::from_secs(1));
        assert_eq!(config.reconnect.step(), Duration::from_secs(1));
        assert_eq!(config.reconnect.ceiling(), Duration::from_secs(30));
        assert_eq!(config.server.query_timeout(), Duration::from_secs(8));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.event_bus.channel_capacity, 1024);
    }

    #[test]
    fn default_template_parses_to_defaults() {
        let config = parse_without_env(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.server.domain, "localhost");
        assert_eq!(config.reconnect.ceiling_ms, 30_000);
        assert!(config.server.address.is_none());
    }

    #[test]
    fn parses_custom_room_and_liveness() {
        let toml = r#"
[server]
address = "d3NzOi8vZXhhbXBsZS5jb20="
domain = "example.com"
muc_domain = "conference.example.com"

[room]
name = "lobby"
nickname = "alice"
history_max_stanzas = 20
history_seconds = 600
history_since = "2026-01-01T08:00:00+02:00"

[liveness]
period_ms = 5000
timeout_ms = 250
target = "example.com"
"#;
        let config = parse_without_env(toml).unwrap();
        assert_eq!(
            config.server.address.as_deref(),
            Some("d3NzOi8vZXhhbXBsZS5jb20=")
        );
        assert_eq!(config.server.muc_domain, "conference.example.com");
        assert_eq!(config.room.name, "lobby");
        assert_eq!(config.room.nickname.as_deref(), Some("alice"));
        assert_eq!(config.room.history_max_stanzas, Some(20));
        assert_eq!(config.room.history_seconds, Some(600));
        assert_eq!(
            config.room.history_since.map(|since| since.to_rfc3339()),
            Some("2026-01-01T08:00:00+02:00".to_string())
        );
        assert!(config.room.history_max_chars.is_none());
        assert_eq!(config.liveness.period(), Duration::from_secs(5));
        assert_eq!(config.liveness.timeout(), Duration::from_millis(250));
        assert_eq!(config.liveness.target.as_deref(), Some("example.com"));
    }

    // ── Validation ────────────────────────────────────────────────

    #[test]
    fn rejects_empty_muc_domain() {
        let err = parse_without_env("[server]\nmuc_domain = \"\"\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "server.muc_domain"),
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn rejects_step_above_ceiling() {
        let toml = r#"
[reconnect]
step_ms = 5000
ceiling_ms = 1000
"#;
        let err = parse_without_env(toml).unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "reconnect.step_ms"),
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn rejects_zero_liveness_timeout() {
        let err = parse_without_env("[liveness]\ntimeout_ms = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "liveness.timeout_ms"
        ));
    }

    #[test]
    fn rejects_blank_nickname() {
        let err = parse_without_env("[room]\nnickname = \"  \"\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "room.nickname"
        ));
    }

    #[test]
    fn rejects_invalid_log_level() {
        let err = parse_without_env("[logging]\nlevel = \"verbose\"\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "logging.level"),
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn accepts_all_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let toml = format!("[logging]\nlevel = \"{level}\"\n");
            parse_without_env(&toml).unwrap();
        }
    }

    // ── Invalid TOML ──────────────────────────────────────────────

    #[test]
    fn invalid_toml_reports_position() {
        let toml = r#"
[room]
name = "lobby"
bad_line ===
"#;
        let err = parse_without_env(toml).unwrap_err();
        match err {
            ConfigError::InvalidToml { line, .. } => {
                assert!(line > 0, "line should be > 0, got {line}");
            }
            other => panic!("expected InvalidToml, got: {other}"),
        }
    }

    // ── Environment variable overrides ────────────────────────────

    #[test]
    fn overrides_take_precedence() {
        let toml = r#"
[server]
address = "ZmlsZQ=="

[room]
name = "file-room"

[logging]
level = "warn"
"#;
        let overrides = ConfigOverrides {
            server: Some("ZW52".to_string()),
            room: Some("env-room".to_string()),
            nickname: Some("env-nick".to_string()),
            log_level: Some("trace".to_string()),
        };

        let config = load_config_from_str_with_overrides(toml, overrides).unwrap();
        assert_eq!(config.server.address.as_deref(), Some("ZW52"));
        assert_eq!(config.room.name, "env-room");
        assert_eq!(config.room.nickname.as_deref(), Some("env-nick"));
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn invalid_override_is_still_validated() {
        let overrides = ConfigOverrides {
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        let err = load_config_from_str_with_overrides("", overrides).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    // ── File-based loading ────────────────────────────────────────

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[room]\nname = \"ops\"\n").unwrap();

        let config = load_config_from_with_overrides(path, ConfigOverrides::default()).unwrap();
        assert_eq!(config.room.name, "ops");
    }

    #[tracing_test::traced_test]
    #[test]
    fn missing_file_creates_default_and_loads_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subdir").join("config.toml");

        let config =
            load_config_from_with_overrides(path.clone(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.room.name, "test1");

        assert!(path.exists(), "default config should have been created");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[reconnect]"));
        assert!(logs_contain("wrote default configuration"));
    }

    #[test]
    fn config_path_ends_with_config_toml() {
        let path = config_path();
        assert!(
            path.ends_with("config.toml"),
            "config_path should end with config.toml, got: {path:?}"
        );
    }
}
