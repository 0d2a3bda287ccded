use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Support chat server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "helpdesk-server", version, about = "Live customer-support chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HELPDESK_PORT", default_value = "8081")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HELPDESK_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./helpdesk.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HELPDESK_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "HELPDESK_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Shared HS256 secret for access tokens. Generated into data_dir when unset.
    #[arg(long, env = "HELPDESK_JWT_SECRET")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Keep chat history in memory only (lost on restart)
    #[arg(long, env = "HELPDESK_EPHEMERAL")]
    pub ephemeral: bool,

    /// Print an access token for this user id and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<u64>,

    /// Role embedded in the token printed by --issue-token ("user" or "agent")
    #[arg(long, default_value = "user")]
    pub issue_token_role: String,

    /// Chat routing configuration (loaded from [chat] section in TOML)
    #[arg(skip)]
    #[serde(default = "default_chat_config", skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,
}

/// Tuning for connections and the session router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Frames buffered per connection before new ones are dropped (default: 256)
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Events buffered in front of the router (default: 1024)
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Messages kept in a session's in-memory transcript and replayed on
    /// connect or take (default: 50). Must be below outbound_queue_capacity.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Largest accepted inbound frame in bytes (default: 512)
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Seconds without a pong before a connection is dropped (default: 60)
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,

    /// Seconds a single write may take (default: 10)
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,

    /// Endpoint that stores uploaded attachments and answers {"url": ...}
    #[serde(default = "default_media_service_url")]
    pub media_service_url: String,

    /// Largest accepted upload request body in bytes (default: 10 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            event_queue_capacity: default_event_queue_capacity(),
            history_limit: default_history_limit(),
            max_frame_bytes: default_max_frame_bytes(),
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
            media_service_url: default_media_service_url(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ChatConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Pings go out a little before the peer's pong would be overdue.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    /// Reject settings that would make the server unusable.
    pub fn validate(&self) -> Result<(), String> {
        let checks = [
            ("outbound_queue_capacity", self.outbound_queue_capacity as u64),
            ("event_queue_capacity", self.event_queue_capacity as u64),
            ("history_limit", self.history_limit as u64),
            ("max_frame_bytes", self.max_frame_bytes as u64),
            ("pong_wait_secs", self.pong_wait_secs),
            ("write_wait_secs", self.write_wait_secs),
            ("max_upload_bytes", self.max_upload_bytes as u64),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(format!("chat.{name} must be greater than zero"));
            }
        }
        // A full replay plus its confirmation must fit in one queue
        if self.history_limit >= self.outbound_queue_capacity {
            return Err(format!(
                "chat.history_limit ({}) must be below chat.outbound_queue_capacity ({})",
                self.history_limit, self.outbound_queue_capacity
            ));
        }
        if self.media_service_url.is_empty() {
            return Err("chat.media_service_url must not be empty".to_string());
        }
        Ok(())
    }
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_history_limit() -> usize {
    50
}

fn default_max_frame_bytes() -> usize {
    512
}

fn default_pong_wait_secs() -> u64 {
    60
}

fn default_write_wait_secs() -> u64 {
    10
}

fn default_media_service_url() -> String {
    "http://media_container:8084/media-service/uploads".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 << 20
}

fn default_chat_config() -> Option<ChatConfig> {
    Some(ChatConfig::default())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            bind_address: "0.0.0.0".to_string(),
            config: "./helpdesk.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            ephemeral: false,
            issue_token: None,
            issue_token_role: "user".to_string(),
            chat: Some(ChatConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HELPDESK_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HELPDESK_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// Effective chat settings.
    pub fn chat(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Helpdesk Chat Server Configuration
# Place this file at ./helpdesk.toml or specify with --config <path>
# All settings can be overridden via environment variables (HELPDESK_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8081)
# port = 8081

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated JWT key
# data_dir = "./data"

# Shared HS256 secret used to verify access tokens.
# When unset, a random key is generated into data_dir on first boot.
# jwt_secret = "change-me"

# Keep chat history in memory only (nothing written to data_dir)
# ephemeral = false

# ---- Chat routing ----
# [chat]

# Frames buffered per connection; further frames are dropped for slow clients
# outbound_queue_capacity = 256

# Events buffered in front of the session router
# event_queue_capacity = 1024

# Messages kept in a session's transcript and replayed on (re)connect;
# must be below outbound_queue_capacity
# history_limit = 50

# Largest inbound frame in bytes; larger frames close the connection
# max_frame_bytes = 512

# Seconds without a pong before the connection is considered dead
# pong_wait_secs = 60

# Seconds a single write may take before the connection is dropped
# write_wait_secs = 10

# Media service that stores uploaded attachments (POST /api/chat/upload)
# media_service_url = "http://media_container:8084/media-service/uploads"

# Largest accepted upload in bytes
# max_upload_bytes = 10485760
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.chat(), ChatConfig::default());
    }

    #[test]
    fn test_chat_section_overrides() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string("[chat]\nhistory_limit = 20\npong_wait_secs = 30\n"))
            .extract()
            .unwrap();
        let chat = config.chat();
        assert_eq!(chat.history_limit, 20);
        assert_eq!(chat.outbound_queue_capacity, 256);
        assert_eq!(chat.ping_period(), Duration::from_secs(27));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let chat = ChatConfig {
            outbound_queue_capacity: 0,
            ..ChatConfig::default()
        };
        let err = chat.validate().unwrap_err();
        assert!(err.contains("outbound_queue_capacity"));
        assert!(ChatConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_window_larger_than_queue() {
        let chat = ChatConfig {
            history_limit: 256,
            outbound_queue_capacity: 256,
            ..ChatConfig::default()
        };
        let err = chat.validate().unwrap_err();
        assert!(err.contains("history_limit"));

        let chat = ChatConfig {
            history_limit: 255,
            ..chat
        };
        assert!(chat.validate().is_ok());
    }
}
