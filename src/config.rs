// SPDX-License-Identifier: GPL-3.0-only

//! Configuration (C12): defaults for port, device path, and log filter,
//! loadable from an optional `~/.config/webcam-stream/config.json`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default TCP port both binaries bind/dial when none is given explicitly.
pub const DEFAULT_PORT: u16 = 32123;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Port the server binds and the client dials by default.
    pub port: u16,
    /// Device path opened by `OPEN_WEBCAM` when none is given explicitly.
    pub device: String,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            device: "/dev/video0".to_string(),
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Returns `~/.config/webcam-stream/config.json`, or `None` if the home
    /// directory can't be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("webcam-stream").join("config.json"))
    }

    /// Loads configuration from `path`, falling back to defaults (with a
    /// warning) if the file is missing or malformed. A missing/bad config
    /// file is never a startup error since every field has a sane default.
    pub fn load(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no config file found, using defaults");
                Config::default()
            }
        }
    }

    /// Loads from [`Config::default_path`], or returns defaults if that path
    /// can't be determined.
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => {
                warn!("could not determine a config directory, using defaults");
                Config::default()
            }
        }
    }
}
