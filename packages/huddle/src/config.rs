use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [auth]
//                    session_ttl_secs = 7200
//
//   env var:         HUDDLE_AUTH__SESSION_TTL_SECS=7200   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Server bind knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Auth tunables (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_allow_registration")]
    pub allow_registration: bool,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            allow_registration: default_allow_registration(),
        }
    }
}

/// Chat tunables (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    /// Messages returned by the history endpoint per request.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_session_ttl() -> u64 {
    3600
}
fn default_allow_registration() -> bool {
    true
}
fn default_history_limit() -> usize {
    50
}

/// Resolved auth configuration (runtime view shared with handlers).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub session_ttl_secs: u64,
    pub allow_registration: bool,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            session_ttl_secs: fc.session_ttl_secs,
            allow_registration: fc.allow_registration,
        }
    }
}

/// Build a figment that layers: struct defaults → config.toml → HUDDLE_* env.
///
/// Env vars use double-underscore for nesting into sections:
///   `HUDDLE_SERVER__PORT=8080`           →  `server.port = 8080`
///   `HUDDLE_AUTH__SESSION_TTL_SECS=7200` →  `auth.session_ttl_secs = 7200`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("HUDDLE_").split("__"))
}

impl FileConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .context("invalid server.host/server.port")
    }
}
