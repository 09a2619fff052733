//! Error types for the fatal (init-time) error taxonomy.
//!
//! Transient and data errors (serial write failures, CRC mismatches,
//! decoder errors) are recovered locally where they occur and logged via
//! `tracing` — they never reach these types, which cover only the
//! propagate-to-supervisor-and-exit categories.

/// Fatal errors that abort startup. The supervisor reports these and
/// exits with status 1.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("hardware init failed: {0}")]
    HardwareInit(String),

    #[error("serial device init failed: {0}")]
    SerialInit(String),

    #[error("audio device init failed: {0}")]
    AudioInit(String),
}

/// A malformed or semantically invalid configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid channel reference: {0}")]
    InvalidChannel(String),

    #[error("invalid pwm threshold: {0}")]
    InvalidThreshold(String),

    #[error("missing sound file handle: {0}")]
    MissingSound(String),
}
