//! Configuration loading and defaults.
//!
//! This covers only the daemon's ambient concerns — logging and the paths
//! and constants the PPP supervisor and command engine use. The modem's
//! operational settings (`connect`, `roaming`, `pin`, `apn`, `user`,
//! `passwd`) are owned by the external settings service (see
//! `settings.rs`) and never appear here.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `MODEMD_DEVICE`, `MODEMD_LOG_LEVEL`
//! 2. **Config file** — path via `--config <path>`, or `modemd.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [device]
//! serial = "/dev/ttyUSB2"
//!
//! [logging]
//! level = "info"
//!
//! [engine]
//! cmdq_max = 15
//! wdog_gpio = 44
//! tick_interval_secs = 5
//!
//! [ppp]
//! auth_file = "/run/ppp/auth"
//! chat_file = "/run/ppp/chat"
//! svc_binary = "svc"
//! service_dir = "/service/ppp"
//! log_dir = "/service/ppp/log"
//! iface = "ppp0"
//! stall_timeout_secs = 60
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine;
use crate::ppp::PppConfig;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ppp: PppFileConfig,
}

/// Serial device identity.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Path to the modem's serial device. Override with `MODEMD_DEVICE` or
    /// `-s <tty>`; the CLI flag wins over both.
    #[serde(default = "default_serial")]
    pub serial: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env
    /// var, and promoted to `debug` by `-d`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Command-engine tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum pending (not in-flight) queued commands (default 15).
    #[serde(default = "default_cmdq_max")]
    pub cmdq_max: usize,
    /// Watchdog GPIO line number (default 44).
    #[serde(default = "default_wdog_gpio")]
    pub wdog_gpio: i32,
    /// Seconds between periodic ticks (default 5).
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl EngineConfig {
    pub fn to_engine_config(&self) -> engine::EngineConfig {
        engine::EngineConfig {
            cmdq_max: self.cmdq_max,
            wdog_gpio: self.wdog_gpio,
            tick_interval: Duration::from_secs(self.tick_interval_secs),
        }
    }
}

/// PPP file paths and external invocations, mirrored into [`PppConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct PppFileConfig {
    #[serde(default = "default_auth_file")]
    pub auth_file: String,
    #[serde(default = "default_chat_file")]
    pub chat_file: String,
    #[serde(default = "default_svc_binary")]
    pub svc_binary: String,
    #[serde(default = "default_service_dir")]
    pub service_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_iface")]
    pub iface: String,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

impl PppFileConfig {
    pub fn to_ppp_config(&self) -> PppConfig {
        PppConfig {
            auth_file: self.auth_file.clone(),
            chat_file: self.chat_file.clone(),
            svc_binary: self.svc_binary.clone(),
            service_dir: self.service_dir.clone(),
            log_dir: self.log_dir.clone(),
            iface: self.iface.clone(),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
        }
    }
}

fn default_serial() -> String {
    "/dev/ttyUSB2".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cmdq_max() -> usize {
    15
}
fn default_wdog_gpio() -> i32 {
    44
}
fn default_tick_interval_secs() -> u64 {
    5
}
fn default_auth_file() -> String {
    "/run/ppp/auth".to_string()
}
fn default_chat_file() -> String {
    "/run/ppp/chat".to_string()
}
fn default_svc_binary() -> String {
    "svc".to_string()
}
fn default_service_dir() -> String {
    "/service/ppp".to_string()
}
fn default_log_dir() -> String {
    "/service/ppp/log".to_string()
}
fn default_iface() -> String {
    "ppp0".to_string()
}
fn default_stall_timeout_secs() -> u64 {
    60
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: default_serial(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cmdq_max: default_cmdq_max(),
            wdog_gpio: default_wdog_gpio(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl Default for PppFileConfig {
    fn default() -> Self {
        Self {
            auth_file: default_auth_file(),
            chat_file: default_chat_file(),
            svc_binary: default_svc_binary(),
            service_dir: default_service_dir(),
            log_dir: default_log_dir(),
            iface: default_iface(),
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            ppp: PppFileConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file >
    /// defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure — a bad
    /// config path at startup is not recoverable). Otherwise looks for
    /// `modemd.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("failed to read config file {p}: {e}"));
            toml::from_str(&content).unwrap_or_else(|e| panic!("failed to parse config file {p}: {e}"))
        } else if Path::new("modemd.toml").exists() {
            let content = std::fs::read_to_string("modemd.toml").expect("failed to read modemd.toml");
            toml::from_str(&content).expect("failed to parse modemd.toml")
        } else {
            Config::default()
        };

        if let Ok(serial) = std::env::var("MODEMD_DEVICE") {
            config.device.serial = serial;
        }
        if let Ok(level) = std::env::var("MODEMD_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let c = Config::default();
        assert_eq!(c.engine.wdog_gpio, 44);
        assert_eq!(c.engine.cmdq_max, 15);
        assert_eq!(c.ppp.stall_timeout_secs, 60);
        assert_eq!(c.ppp.auth_file, "/run/ppp/auth");
    }

    #[test]
    fn env_override_wins_over_default() {
        std::env::set_var("MODEMD_DEVICE", "/dev/ttyTEST0");
        let c = Config::load(None);
        assert_eq!(c.device.serial, "/dev/ttyTEST0");
        std::env::remove_var("MODEMD_DEVICE");
    }
}
