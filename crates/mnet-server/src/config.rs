//! Server configuration: TOML file + CLI overrides.
//!
//! The transport library itself only consumes the resolved
//! [`ListenerConfig`] / [`TransportConfig`]; the file format belongs to
//! the `mnet-server` binary.

use mnet_core::keystream::DEFAULT_MAX_FRAME_SIZE;
use mnet_core::{NetError, NetResult, PatchType};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Protocol version announced in the handshake.
pub const DEFAULT_VERSION: u32 = 12;
/// Block IV announced in the handshake.
pub const DEFAULT_BLOCK_IV: u32 = 12;

/// Per-session transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub version: u32,
    pub block_iv: u32,
    /// Size of each socket read.
    pub read_buffer_size: usize,
    /// Unread bytes in the receive pipe at which the socket pump stops
    /// reading until the session thread catches up.
    pub pause_threshold: usize,
    /// Encrypted packets a session may have queued for the socket before the
    /// peer is considered stalled and kicked.
    pub outbound_capacity: usize,
    /// Upper bound on one socket write before the peer is kicked.
    pub write_timeout: Duration,
    /// How long teardown waits for the session thread to exit.
    pub stop_timeout: Duration,
    /// Opcodes left out of packet trace logs.
    pub quiet_opcodes: Vec<u16>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            block_iv: DEFAULT_BLOCK_IV,
            read_buffer_size: 4096,
            pause_threshold: 64 * 1024,
            outbound_capacity: 1024,
            write_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_millis(2000),
            quiet_opcodes: Vec::new(),
        }
    }
}

/// Settings for one listening port.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub patch_type: PatchType,
    pub transport: TransportConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: default_port(),
            patch_type: PatchType::Ignore,
            transport: TransportConfig::default(),
        }
    }
}

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub transport: TransportSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_patch_type")]
    pub patch_type: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            patch_type: default_patch_type(),
        }
    }
}

/// `[protocol]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSection {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_block_iv")]
    pub block_iv: u32,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            version: default_version(),
            block_iv: default_block_iv(),
        }
    }
}

/// `[transport]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_pause_threshold")]
    pub pause_threshold: usize,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default)]
    pub quiet_opcodes: Vec<u16>,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            pause_threshold: default_pause_threshold(),
            outbound_capacity: default_outbound_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            quiet_opcodes: Vec::new(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    20001
}
fn default_patch_type() -> String {
    "ignore".to_string()
}
fn default_version() -> u32 {
    DEFAULT_VERSION
}
fn default_block_iv() -> u32 {
    DEFAULT_BLOCK_IV
}
fn default_read_buffer_size() -> usize {
    4096
}
fn default_pause_threshold() -> usize {
    64 * 1024
}
fn default_outbound_capacity() -> usize {
    1024
}
fn default_write_timeout_ms() -> u64 {
    10_000
}
fn default_stop_timeout_ms() -> u64 {
    2000
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub version: Option<u32>,
    pub patch_type: Option<String>,
}

/// Resolved server configuration (file loaded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listener: ListenerConfig,
    pub max_frame_size: usize,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides. A missing
    /// file means defaults.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> NetResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| NetError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, cli)
    }

    fn resolve(file: ConfigFile, cli: &CliOverrides) -> NetResult<Self> {
        let bind_str = cli.bind.clone().unwrap_or(file.server.bind);
        let bind: IpAddr = bind_str
            .parse()
            .map_err(|e| NetError::Config(format!("invalid bind address {bind_str}: {e}")))?;
        let patch_type: PatchType = cli
            .patch_type
            .as_deref()
            .unwrap_or(&file.server.patch_type)
            .parse()?;

        if file.transport.outbound_capacity == 0 {
            return Err(NetError::Config("outbound_capacity must be at least 1".into()));
        }
        if file.transport.read_buffer_size == 0 {
            return Err(NetError::Config("read_buffer_size must be at least 1".into()));
        }
        if file.transport.pause_threshold == 0 {
            return Err(NetError::Config("pause_threshold must be at least 1".into()));
        }

        let transport = TransportConfig {
            version: cli.version.unwrap_or(file.protocol.version),
            block_iv: file.protocol.block_iv,
            read_buffer_size: file.transport.read_buffer_size,
            pause_threshold: file.transport.pause_threshold,
            outbound_capacity: file.transport.outbound_capacity,
            write_timeout: Duration::from_millis(file.transport.write_timeout_ms),
            stop_timeout: Duration::from_millis(file.transport.stop_timeout_ms),
            quiet_opcodes: file.transport.quiet_opcodes,
        };

        Ok(Self {
            listener: ListenerConfig {
                bind,
                port: cli.port.unwrap_or(file.server.port),
                patch_type,
                transport,
            },
            max_frame_size: file.transport.max_frame_size,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
