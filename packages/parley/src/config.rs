use anyhow::{Context, Result};
use parley_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    api_url = "https://chat.example.com"
//
//   env var:         PARLEY_SERVER__API_URL=https://chat.example.com
//
//   (single underscore stays within field names: PARLEY_STOMP__CONNECT_TIMEOUT_SECS)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub stomp: StompFileConfig,
}

/// Backend endpoints (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Session core tunables (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            page_size: default_page_size(),
        }
    }
}

/// Broker destinations and handshake timing (lives under `[stomp]`).
///
/// Presence and broadcast chat share the public topic but are sent to
/// different application destinations; private chat is sent to
/// `private_send_prefix + conversation id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StompFileConfig {
    #[serde(default = "default_public_subscribe")]
    pub public_subscribe: String,
    #[serde(default = "default_presence_send")]
    pub presence_send: String,
    #[serde(default = "default_public_send")]
    pub public_send: String,
    #[serde(default = "default_conversation_subscribe_prefix")]
    pub conversation_subscribe_prefix: String,
    #[serde(default = "default_private_send_prefix")]
    pub private_send_prefix: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for StompFileConfig {
    fn default() -> Self {
        Self {
            public_subscribe: default_public_subscribe(),
            presence_send: default_presence_send(),
            public_send: default_public_send(),
            conversation_subscribe_prefix: default_conversation_subscribe_prefix(),
            private_send_prefix: default_private_send_prefix(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_ws_url() -> String {
    "ws://localhost:8080/ws/websocket".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_event_capacity() -> usize {
    SessionConfig::default().event_capacity
}
fn default_page_size() -> u32 {
    SessionConfig::default().page_size
}
fn default_public_subscribe() -> String {
    "/topic/public".to_string()
}
fn default_presence_send() -> String {
    "/app/chat.addUser".to_string()
}
fn default_public_send() -> String {
    "/app/chat.sendMessage".to_string()
}
fn default_conversation_subscribe_prefix() -> String {
    "/topic/conversations.".to_string()
}
fn default_private_send_prefix() -> String {
    "/app/chat.sendPrivateMessage/".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}

/// Build a figment that layers: defaults → config.toml → PARLEY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PARLEY_SERVER__WS_URL=wss://…`  →  `server.ws_url = "wss://…"`
///   `PARLEY_SESSION__PAGE_SIZE=50`   →  `session.page_size = 50`
///
/// `PARLEY_TOKEN` is not part of the file config; the CLI reads it directly.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("PARLEY_").ignore(&["TOKEN"]).split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Where and how to reach the backend (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub api_url: String,
    pub ws_url: String,
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            api_url: fc.api_url.trim_end_matches('/').to_string(),
            ws_url: fc.ws_url.clone(),
            request_timeout: Duration::from_secs(fc.request_timeout_secs.max(1)),
        }
    }
}

/// Mapping from abstract topics to broker destinations (runtime view).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationMap {
    pub public_subscribe: String,
    pub presence_send: String,
    pub public_send: String,
    pub conversation_subscribe_prefix: String,
    pub private_send_prefix: String,
}

impl Default for DestinationMap {
    fn default() -> Self {
        Self::from_file(&StompFileConfig::default())
    }
}

#[derive(Clone, Debug)]
pub struct StompConfig {
    pub destinations: DestinationMap,
    pub connect_timeout: Duration,
}

impl StompConfig {
    pub fn from_file(fc: &StompFileConfig) -> Self {
        Self {
            destinations: DestinationMap::from_file(fc),
            connect_timeout: Duration::from_secs(fc.connect_timeout_secs.max(1)),
        }
    }
}

impl DestinationMap {
    pub fn from_file(fc: &StompFileConfig) -> Self {
        Self {
            public_subscribe: fc.public_subscribe.clone(),
            presence_send: fc.presence_send.clone(),
            public_send: fc.public_send.clone(),
            conversation_subscribe_prefix: fc.conversation_subscribe_prefix.clone(),
            private_send_prefix: fc.private_send_prefix.clone(),
        }
    }
}

pub fn session_config(fc: &SessionFileConfig) -> SessionConfig {
    SessionConfig {
        event_capacity: fc.event_capacity.max(1),
        page_size: fc.page_size.max(1),
    }
}

// =============================================================================
// Directory layout (derived from --config-dir, not read through figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ParleyDirs {
    pub config_dir: PathBuf,
}

impl ParleyDirs {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".parley"),
        };

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

        debug!("Config directory: {}", config_dir.display());

        Ok(Self { config_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}
