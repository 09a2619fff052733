//! Output sinks that pull rendered blocks from a [`Mixer`].
//!
//! Grounded on the reference frontend's `HybridAudioSource`: a `rodio`
//! `Source`/`Iterator` that is driven by the mixer thread rather than by
//! rodio's own callback, keeping the mix loop in control of timing.

use super::mixer::{Mixer, BLOCK_FRAMES, OUTPUT_SAMPLE_RATE};
use std::sync::Arc;
use std::time::Duration;

/// A `rodio::Source` that renders one [`Mixer`] block at a time and
/// streams it sample-by-sample to the sink.
pub struct MixerSource {
    mixer: Arc<Mixer>,
    block: Vec<i16>,
    pos: usize,
}

impl MixerSource {
    pub fn new(mixer: Arc<Mixer>) -> Self {
        MixerSource { mixer, block: Vec::new(), pos: 0 }
    }
}

impl Iterator for MixerSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.pos >= self.block.len() {
            self.block = self.mixer.mix_block();
            self.pos = 0;
        }
        let sample = self.block[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl rodio::Source for MixerSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(BLOCK_FRAMES * 2 - self.pos)
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Real rodio output: opens the default audio device and plays a
/// [`MixerSource`] indefinitely.
pub struct RodioOutput {
    // Held only to keep the output stream alive for the process lifetime.
    _stream: rodio::OutputStream,
    sink: rodio::Sink,
}

impl RodioOutput {
    pub fn open(mixer: Arc<Mixer>) -> Result<Self, String> {
        let (stream, handle) =
            rodio::OutputStream::try_default().map_err(|e| format!("audio device: {e}"))?;
        let sink = rodio::Sink::try_new(&handle).map_err(|e| format!("audio sink: {e}"))?;
        sink.append(MixerSource::new(mixer));
        sink.play();
        Ok(RodioOutput { _stream: stream, sink })
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

/// Fallback output for hosts with no audio device. The mixer keeps
/// running and effect subsystems keep issuing `play`/`stop` calls
/// normally; the rendered audio is simply discarded.
///
/// Drains blocks on a background thread so channel cursors still advance
/// at real-time pace (e.g. `remaining_ms` stays meaningful) even with no
/// device attached.
pub struct NullSink {
    running: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl NullSink {
    pub fn start(mixer: Arc<Mixer>) -> Self {
        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let running_t = running.clone();
        let block_duration = Duration::from_secs_f64(BLOCK_FRAMES as f64 / OUTPUT_SAMPLE_RATE as f64);
        let handle = std::thread::Builder::new()
            .name("audio-null-sink".into())
            .spawn(move || {
                while running_t.load(std::sync::atomic::Ordering::Acquire) {
                    mixer.mix_block();
                    std::thread::sleep(block_duration);
                }
            })
            .expect("spawn null sink thread");
        NullSink { running, handle: Some(handle) }
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        self.running.store(false, std::sync::atomic::Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixer_source_streams_full_blocks() {
        let mixer = Arc::new(Mixer::new());
        let mut source = MixerSource::new(mixer);
        let drained: Vec<i16> = (&mut source).take(BLOCK_FRAMES * 2 + 10).collect();
        assert_eq!(drained.len(), BLOCK_FRAMES * 2 + 10);
    }

    #[test]
    fn null_sink_runs_and_stops_cleanly() {
        let mixer = Arc::new(Mixer::new());
        let sink = NullSink::start(mixer);
        std::thread::sleep(Duration::from_millis(20));
        drop(sink);
    }
}
