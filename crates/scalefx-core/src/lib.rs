//! Control-loop core for a scale-model effects rig.
//!
//! Composes four independent subsystems — PWM edge-capture monitors, an
//! audio mixer, a serial command framer, and the engine/gun effect
//! state machines — behind a [`supervisor::Supervisor`] that owns
//! startup and teardown ordering.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod gun;
pub mod pwm;
pub mod serial;
pub mod supervisor;

pub use audio::AudioBackend;
pub use config::Config;
pub use error::{ConfigError, CoreError};
pub use supervisor::Supervisor;
