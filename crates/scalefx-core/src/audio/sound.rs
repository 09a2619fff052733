//! Decoded sound sources shared across mixer channels and effect configs.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// A fully decoded PCM sound, shared by `Arc` across every channel/effect
/// that references it — the `Sound` is the shared logical identity; each
/// channel's own cursor gives independent playback position.
pub struct SoundData {
    /// Interleaved samples. Mono sources are expanded to stereo at load
    /// time so channel mixing never needs to special-case channel count.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

#[derive(Clone)]
pub struct Sound(pub(crate) Arc<SoundData>);

impl Sound {
    /// Decode a sound file (any format `rodio::Decoder` understands) fully
    /// into memory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let decoder = rodio::Decoder::new(BufReader::new(file))
            .map_err(|e| format!("{}: decode error: {e}", path.display()))?;
        Self::from_decoder(decoder)
    }

    fn from_decoder<S>(decoder: S) -> Result<Self, String>
    where
        S: rodio::Source<Item = i16>,
    {
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        if channels == 0 {
            return Err("decoded sound has zero channels".into());
        }
        let raw: Vec<i16> = decoder.collect();
        let samples = if channels == 1 {
            let mut stereo = Vec::with_capacity(raw.len() * 2);
            for s in raw {
                stereo.push(s);
                stereo.push(s);
            }
            stereo
        } else if channels == 2 {
            raw
        } else {
            // Downmix anything wider than stereo to L/R by taking the
            // first two channels of each frame.
            let mut stereo = Vec::with_capacity(raw.len() / channels as usize * 2);
            for frame in raw.chunks(channels as usize) {
                stereo.push(frame[0]);
                stereo.push(frame.get(1).copied().unwrap_or(frame[0]));
            }
            stereo
        };
        Ok(Sound(Arc::new(SoundData { samples, sample_rate })))
    }

    /// Build a [`Sound`] directly from pre-decoded interleaved stereo i16
    /// samples. Used by tests and by in-memory effect sounds.
    pub fn from_stereo_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Sound(Arc::new(SoundData { samples, sample_rate }))
    }

    /// Total length in stereo frames.
    pub fn frame_count(&self) -> usize {
        self.0.samples.len() / 2
    }

    /// Total length in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        ((self.frame_count() as u64 * 1000) / self.0.sample_rate.max(1) as u64) as u32
    }

    /// Convert a millisecond offset into a frame index, clamped to the
    /// sound's length: an offset beyond the end clamps to the last frame.
    pub fn ms_to_frame(&self, ms: u32) -> usize {
        let frame = (ms as u64 * self.0.sample_rate as u64) / 1000;
        (frame as usize).min(self.frame_count())
    }

    pub(crate) fn data(&self) -> &SoundData {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_frame_clamps_to_length() {
        let sound = Sound::from_stereo_samples(vec![0i16; 2 * 1000], 1000); // 1000 frames @ 1kHz = 1000ms
        assert_eq!(sound.ms_to_frame(500), 500);
        assert_eq!(sound.ms_to_frame(5000), 1000);
    }

    #[test]
    fn duration_matches_frame_count_and_rate() {
        let sound = Sound::from_stereo_samples(vec![0i16; 2 * 4410], 44100);
        assert_eq!(sound.duration_ms(), 100);
    }
}
