//! Audio mixing subsystem: a fixed-channel mixer driven by a dedicated
//! mix thread, writing to a `rodio`-backed output sink.

mod mixer;
mod sink;
mod sound;

pub use mixer::{Mixer, OutputMode, StopMode, BLOCK_FRAMES, CHANNEL_COUNT, OUTPUT_SAMPLE_RATE};
pub use sink::{MixerSource, NullSink, RodioOutput};
pub use sound::Sound;

use crate::error::CoreError;
use std::sync::Arc;

/// Owns the mixer and whichever output backend was selected at startup.
/// Dropping it tears down the output thread/device.
pub enum AudioOutput {
    Rodio(RodioOutput),
    Null(NullSink),
}

/// Which output backend [`start_audio`] should attach.
pub enum AudioBackend {
    /// Open the default audio device; failing to do so is a fatal
    /// hardware-init error.
    Auto,
    /// Skip real hardware and drain blocks on a background thread
    /// instead. Injected explicitly by callers that don't want a real
    /// device — e.g. tests and headless hosts.
    Null,
}

/// Build a mixer and attach the requested output. [`AudioBackend::Auto`]
/// opening a real device is the only path that can fail; a missing
/// device there propagates as [`CoreError::AudioInit`] rather than
/// silently degrading, matching how GPIO and serial init failures are
/// handled elsewhere in the supervisor.
pub fn start_audio(
    mixer: Arc<Mixer>,
    backend: AudioBackend,
) -> Result<(Arc<Mixer>, AudioOutput), CoreError> {
    match backend {
        AudioBackend::Auto => {
            let out = RodioOutput::open(mixer.clone()).map_err(CoreError::AudioInit)?;
            Ok((mixer, AudioOutput::Rodio(out)))
        }
        AudioBackend::Null => {
            let out = NullSink::start(mixer.clone());
            Ok((mixer, AudioOutput::Null(out)))
        }
    }
}
