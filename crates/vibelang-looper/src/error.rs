//! Error types for vibe-looper

use thiserror::Error;

/// Result type alias for vibe-looper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside the real-time path
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// MIDI host error
    #[error("MIDI error: {0}")]
    Midi(String),

    /// JACK connection error
    #[cfg(feature = "native")]
    #[error("JACK error: {0}")]
    Jack(#[from] jack::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
