//! Configuration file support for lswitchd
//!
//! Loads and validates daemon configuration from TOML files.
//! Default location: /etc/lswitch/lswitchd.toml

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coordinator::{ContentionPolicy, CoordinatorConfig};
use crate::error::ConfigError;
use crate::types::validate_program_name;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lswitch/lswitchd.toml";

/// RPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the RPC endpoint binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Linking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Deadline for one runtime install/uninstall, in milliseconds
    #[serde(default = "default_runtime_timeout")]
    pub runtime_timeout_ms: u64,

    /// What a second operation on a busy program does
    #[serde(default)]
    pub contention: ContentionPolicy,
}

/// A program config linked at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSource {
    /// Program name
    pub name: String,
    /// Path to the compiled program JSON
    pub path: PathBuf,
}

impl ProgramSource {
    /// Reads the program config text.
    pub fn read(&self) -> Result<String, ConfigError> {
        fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Complete lswitchd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// RPC server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Linking configuration
    #[serde(default)]
    pub linking: LinkingConfig,

    /// Programs linked at startup, in order
    #[serde(default)]
    pub programs: Vec<ProgramSource>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:9091".to_string()
}

fn default_runtime_timeout() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            runtime_timeout_ms: default_runtime_timeout(),
            contention: ContentionPolicy::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Get runtime timeout as Duration
    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_millis(self.linking.runtime_timeout_ms)
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e| ConfigError::invalid("server.listen_addr", format!("{}", e)))
    }

    /// Coordinator settings derived from the `[linking]` section
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_runtime_timeout(self.runtime_timeout())
            .with_contention(self.linking.contention)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if self.linking.runtime_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "linking.runtime_timeout_ms",
                "must be > 0",
            ));
        }

        let mut names = HashSet::new();
        for program in &self.programs {
            validate_program_name(&program.name)
                .map_err(|e| ConfigError::invalid("programs.name", e.to_string()))?;
            if !names.insert(program.name.as_str()) {
                return Err(ConfigError::invalid(
                    "programs.name",
                    format!("'{}' listed twice", program.name),
                ));
            }
        }

        Ok(())
    }
}
