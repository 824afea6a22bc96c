//! Layered configuration: built-in defaults, overridden by a `.env` file
//! (via `dotenv`), overridden by `JITTERTRAP_`-prefixed environment
//! variables, overridden last by explicit CLI flags — the same
//! defaults-then-env-then-flags layering the teacher's CLI tools use,
//! expressed with the `config` crate instead of hand-rolled precedence.

use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sample_period_us: u32,
    pub messages_per_second: u32,
    pub allowed_ifaces: Vec<String>,
    pub max_json_msg_len: usize,
    pub web_server_port: u16,
    pub resource_path: String,
    pub pcap_output_dir: String,
    pub debug_level: String,
    /// Idle period after which a session with no activity is dropped (e.g.
    /// a WebRTC viewer that stopped receiving packets).
    #[serde(with = "humantime_serde")]
    pub session_idle_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_period_us: 1000,
            messages_per_second: 100,
            allowed_ifaces: vec!["eth0".into(), "lo".into()],
            max_json_msg_len: 64 * 1024,
            web_server_port: 8080,
            resource_path: "./static".into(),
            pcap_output_dir: "./captures".into(),
            debug_level: "info".into(),
            session_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Loads defaults, then `.env` (if present), then `JITTERTRAP_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if an environment variable fails to
    /// deserialize into its field's type (e.g. a non-numeric port).
    pub fn load() -> Result<Self, EngineError> {
        dotenv::dotenv().ok();

        let defaults = Settings::default();
        let builder = config::Config::builder()
            .set_default("sample_period_us", i64::from(defaults.sample_period_us))?
            .set_default("messages_per_second", i64::from(defaults.messages_per_second))?
            .set_default("allowed_ifaces", defaults.allowed_ifaces.clone())?
            .set_default("max_json_msg_len", defaults.max_json_msg_len as i64)?
            .set_default("web_server_port", i64::from(defaults.web_server_port))?
            .set_default("resource_path", defaults.resource_path.clone())?
            .set_default("pcap_output_dir", defaults.pcap_output_dir.clone())?
            .set_default("debug_level", defaults.debug_level.clone())?
            .set_default("session_idle_timeout", "30s")?
            .add_source(
                config::Environment::with_prefix("JITTERTRAP")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies CLI overrides parsed by [`crate::cli`], which take final
    /// precedence over environment and defaults.
    pub fn apply_cli_overrides(&mut self, overrides: &crate::cli::CliOverrides) {
        if let Some(port) = overrides.port {
            self.web_server_port = port;
        }
        if let Some(ref iface) = overrides.interface {
            if !self.allowed_ifaces.iter().any(|i| i == iface) {
                self.allowed_ifaces.push(iface.clone());
            }
        }
        if let Some(ref path) = overrides.resource_path {
            self.resource_path = path.clone();
        }
        if let Some(ref level) = overrides.debug_level {
            self.debug_level = level.clone();
        }
    }
}
