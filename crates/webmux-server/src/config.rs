//! Server configuration: TOML file + CLI overrides.

use crate::routing::RoutingMode;
use crate::session::DEFAULT_HISTORY_CAPACITY;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use webmux_proto::{MuxError, MuxResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sessions: SessionsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// `[sessions]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_routing")]
    pub routing: RoutingMode,
    /// Whether sessions survive their owner's disconnect.
    #[serde(default = "default_true")]
    pub persistent: bool,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Shell executable. Absent means `$SHELL` / platform default.
    #[serde(default)]
    pub shell: Option<String>,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            routing: default_routing(),
            persistent: true,
            history_capacity: default_history_capacity(),
            shell: None,
        }
    }
}

fn default_port() -> u16 {
    4480
}
fn default_max_sessions() -> usize {
    100
}
fn default_routing() -> RoutingMode {
    RoutingMode::OwnerAffinity
}
fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}
fn default_true() -> bool {
    true
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_sessions: usize,
    pub routing: RoutingMode,
    pub persistent: bool,
    pub history_capacity: usize,
    pub default_shell: Option<String>,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_max_sessions: Option<usize>,
        cli_routing: Option<RoutingMode>,
        cli_ephemeral: bool,
        cli_history_capacity: Option<usize>,
        cli_shell: Option<&str>,
    ) -> MuxResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| MuxError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        Ok(Self {
            port: cli_port.unwrap_or(file_config.server.port),
            max_sessions: cli_max_sessions.unwrap_or(file_config.server.max_sessions),
            routing: cli_routing.unwrap_or(file_config.sessions.routing),
            persistent: if cli_ephemeral {
                false
            } else {
                file_config.sessions.persistent
            },
            history_capacity: cli_history_capacity
                .unwrap_or(file_config.sessions.history_capacity),
            default_shell: cli_shell
                .map(|s| s.to_string())
                .or(file_config.sessions.shell),
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
    PathBuf::from(s.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_file_missing() {
        let cfg = ServerConfig::load(
            Some(Path::new("/nonexistent/webmux.toml")),
            None,
            None,
            None,
            false,
            None,
            None,
        )
        .unwrap();
        assert_eq!(cfg.port, 4480);
        assert_eq!(cfg.routing, RoutingMode::OwnerAffinity);
        assert!(cfg.persistent);
        assert_eq!(cfg.history_capacity, DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn file_values_with_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9000\n\n[sessions]\nrouting = \"broadcast\"\npersistent = false\nhistory_capacity = 512\nshell = \"/bin/bash\"\n"
        )
        .unwrap();

        let cfg = ServerConfig::load(
            Some(file.path()),
            Some(9100),
            None,
            None,
            false,
            None,
            None,
        )
        .unwrap();
        assert_eq!(cfg.port, 9100); // CLI wins
        assert_eq!(cfg.routing, RoutingMode::Broadcast);
        assert!(!cfg.persistent);
        assert_eq!(cfg.history_capacity, 512);
        assert_eq!(cfg.default_shell.as_deref(), Some("/bin/bash"));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();
        let err = ServerConfig::load(Some(file.path()), None, None, None, false, None, None)
            .unwrap_err();
        assert!(matches!(err, MuxError::Config(_)));
    }
}
