//! Top-level error type for initialization failures. Per the error-handling
//! design, only STARTING-phase errors abort the process; everything else
//! is confined and logged by the component that encountered it.

use derive_more::{Display, From};

#[derive(Debug, Display, From)]
pub enum EngineError {
    #[display(fmt = "configuration error: {}", _0)]
    Config(config::ConfigError),

    #[display(fmt = "I/O error: {}", _0)]
    Io(std::io::Error),

    #[display(fmt = "failed to bind HTTP server: {}", _0)]
    #[from(ignore)]
    Bind(String),
}

impl std::error::Error for EngineError {}
