//! Fixed-channel-table additive mixer.

use super::sound::Sound;
use std::sync::Mutex;

/// Number of concurrently playable channels. Fixed at compile time so the
/// channel table never allocates on the hot path.
pub const CHANNEL_COUNT: usize = 16;
/// Frames rendered per mix block.
pub const BLOCK_FRAMES: usize = 512;
/// Mixer output sample rate. All sounds are assumed pre-resampled to this
/// rate at load time; resampling is out of scope (see Non-goals).
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

/// How a channel should wind down when stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Silence immediately.
    Immediate,
    /// Ramp volume to zero over a short fixed fade, then silence.
    Fade,
    /// Let the currently playing loop iteration finish, then stop without
    /// looping again.
    LoopEnd,
}

/// Stereo channel routing for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Stereo,
    Left,
    Right,
}

/// Number of frames a `Fade` stop ramps over.
const FADE_FRAMES: u32 = BLOCK_FRAMES as u32 * 4;

#[derive(Clone)]
struct Channel {
    sound: Option<Sound>,
    cursor: usize,
    looping: bool,
    volume: f32,
    output: OutputMode,
    /// `Some(remaining_frames)` while fading out toward silence.
    fading: Option<u32>,
    /// Set when a `LoopEnd` stop has been requested; the channel silences
    /// itself instead of wrapping the cursor on the next loop boundary.
    stop_at_loop_end: bool,
}

impl Channel {
    fn empty() -> Self {
        Channel {
            sound: None,
            cursor: 0,
            looping: false,
            volume: 1.0,
            output: OutputMode::Stereo,
            fading: None,
            stop_at_loop_end: false,
        }
    }

    fn active(&self) -> bool {
        self.sound.is_some()
    }
}

/// Fixed-table additive mixer. All state lives behind one short-lived
/// `Mutex`, never held across I/O; this is the only lock in the audio
/// subsystem.
pub struct Mixer {
    channels: Mutex<[Channel; CHANNEL_COUNT]>,
    master_volume: Mutex<f32>,
}

impl Mixer {
    pub fn new() -> Self {
        Mixer {
            channels: Mutex::new(std::array::from_fn(|_| Channel::empty())),
            master_volume: Mutex::new(1.0),
        }
    }

    pub fn set_master_volume(&self, volume: f32) {
        *self.master_volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    /// Start `sound` playing on `channel` from the beginning, replacing
    /// whatever was previously playing there.
    pub fn play(&self, channel: usize, sound: Sound, volume: f32, looping: bool) {
        self.play_from(channel, sound, volume, looping, 0);
    }

    /// Start `sound` playing on `channel` from `start_ms` into the sound.
    /// An offset beyond the sound's length clamps to the end (silence).
    pub fn play_from(
        &self,
        channel: usize,
        sound: Sound,
        volume: f32,
        looping: bool,
        start_ms: u32,
    ) {
        let mut channels = self.channels.lock().unwrap();
        let cursor = sound.ms_to_frame(start_ms);
        channels[channel] = Channel {
            sound: Some(sound),
            cursor,
            looping,
            volume: volume.clamp(0.0, 2.0),
            output: OutputMode::Stereo,
            fading: None,
            stop_at_loop_end: false,
        };
    }

    /// Stop whatever is playing on `channel` per `mode`. Calling this
    /// twice, or on an already-idle channel, is a no-op.
    pub fn stop(&self, channel: usize, mode: StopMode) {
        let mut channels = self.channels.lock().unwrap();
        stop_one(&mut channels[channel], mode);
    }

    /// Apply `mode` to every channel at once.
    pub fn stop_all(&self, mode: StopMode) {
        let mut channels = self.channels.lock().unwrap();
        for ch in channels.iter_mut() {
            stop_one(ch, mode);
        }
    }

    pub fn set_volume(&self, channel: usize, volume: f32) {
        self.channels.lock().unwrap()[channel].volume = volume.clamp(0.0, 2.0);
    }

    pub fn set_output(&self, channel: usize, output: OutputMode) {
        self.channels.lock().unwrap()[channel].output = output;
    }

    pub fn is_playing(&self, channel: usize) -> bool {
        self.channels.lock().unwrap()[channel].active()
    }

    /// Milliseconds remaining before the channel's current play-through
    /// ends, or `None` if the channel is idle or looping indefinitely.
    pub fn remaining_ms(&self, channel: usize) -> Option<u32> {
        let channels = self.channels.lock().unwrap();
        let ch = &channels[channel];
        let sound = ch.sound.as_ref()?;
        if ch.looping && !ch.stop_at_loop_end {
            return None;
        }
        let remaining_frames = sound.frame_count().saturating_sub(ch.cursor);
        Some(((remaining_frames as u64 * 1000) / sound.data().sample_rate.max(1) as u64) as u32)
    }

    /// Render the next `BLOCK_FRAMES` interleaved stereo frames, advancing
    /// every active channel's cursor.
    pub fn mix_block(&self) -> Vec<i16> {
        let master = *self.master_volume.lock().unwrap();
        let mut channels = self.channels.lock().unwrap();
        let mut accum = vec![0i32; BLOCK_FRAMES * 2];

        for ch in channels.iter_mut() {
            if !ch.active() {
                continue;
            }
            render_channel(ch, master, &mut accum);
        }

        accum
            .into_iter()
            .map(|s| soft_clip(s))
            .collect()
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

fn render_channel(ch: &mut Channel, master: f32, accum: &mut [i32]) {
    let sound = ch.sound.clone().unwrap();
    let data = sound.data();
    let total_frames = sound.frame_count();

    for frame_idx in 0..BLOCK_FRAMES {
        if ch.cursor >= total_frames {
            if ch.looping && !ch.stop_at_loop_end {
                ch.cursor = 0;
            } else {
                *ch = Channel::empty();
                return;
            }
        }

        let fade_scale = match ch.fading {
            Some(remaining) if remaining == 0 => {
                *ch = Channel::empty();
                return;
            }
            Some(remaining) => {
                let scale = remaining as f32 / FADE_FRAMES as f32;
                ch.fading = Some(remaining - 1);
                scale
            }
            None => 1.0,
        };

        let gain = ch.volume * master * fade_scale;
        let base = ch.cursor * 2;
        let l = data.samples[base] as f32 * gain;
        let r = data.samples[base + 1] as f32 * gain;
        let (l, r) = match ch.output {
            OutputMode::Stereo => (l, r),
            OutputMode::Left => (l, 0.0),
            OutputMode::Right => (0.0, r),
        };

        let out = &mut accum[frame_idx * 2..frame_idx * 2 + 2];
        out[0] += l as i32;
        out[1] += r as i32;

        ch.cursor += 1;
    }
}

fn stop_one(ch: &mut Channel, mode: StopMode) {
    if !ch.active() {
        return;
    }
    match mode {
        StopMode::Immediate => *ch = Channel::empty(),
        StopMode::Fade => {
            if ch.fading.is_none() {
                ch.fading = Some(FADE_FRAMES);
            }
        }
        StopMode::LoopEnd => ch.stop_at_loop_end = true,
    }
}

/// Soft-clip beyond full-scale: samples within `[-32768, 32767]` pass
/// through unchanged; excess beyond either bound is attenuated by 1/8
/// instead of hard-clipping.
fn soft_clip(sample: i32) -> i16 {
    const MAX: i32 = i16::MAX as i32;
    const MIN: i32 = i16::MIN as i32;
    if sample > MAX {
        let excess = sample - MAX;
        (MAX + excess / 8).clamp(MIN, MAX) as i16
    } else if sample < MIN {
        let excess = MIN - sample;
        (MIN - excess / 8).clamp(MIN, MAX) as i16
    } else {
        sample as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: i16, frames: usize) -> Sound {
        let mut samples = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            samples.push(amplitude);
            samples.push(amplitude);
        }
        Sound::from_stereo_samples(samples, OUTPUT_SAMPLE_RATE)
    }

    #[test]
    fn soft_clip_passes_in_range_samples_unchanged() {
        assert_eq!(soft_clip(1000), 1000);
        assert_eq!(soft_clip(-1000), -1000);
        assert_eq!(soft_clip(32767), 32767);
        assert_eq!(soft_clip(-32768), -32768);
    }

    #[test]
    fn soft_clip_attenuates_excess_by_eighth() {
        // 32767 + 800 excess -> 32767 + 100
        assert_eq!(soft_clip(32767 + 800), 32767 + 100);
        assert_eq!(soft_clip(-32768 - 800), -32768 - 100);
    }

    #[test]
    fn idle_channel_mixes_silence() {
        let mixer = Mixer::new();
        let block = mixer.mix_block();
        assert!(block.iter().all(|&s| s == 0));
    }

    #[test]
    fn two_channels_mix_additively() {
        let mixer = Mixer::new();
        mixer.play(0, tone(1000, BLOCK_FRAMES), 1.0, true);
        mixer.play(1, tone(2000, BLOCK_FRAMES), 1.0, true);
        let block = mixer.mix_block();
        assert_eq!(block[0], 3000);
        assert_eq!(block[1], 3000);
    }

    #[test]
    fn stop_immediate_silences_and_is_idempotent() {
        let mixer = Mixer::new();
        mixer.play(0, tone(1000, BLOCK_FRAMES), 1.0, true);
        mixer.stop(0, StopMode::Immediate);
        assert!(!mixer.is_playing(0));
        // Second stop on an already-idle channel is a no-op, not a panic.
        mixer.stop(0, StopMode::Immediate);
        assert!(!mixer.is_playing(0));
    }

    #[test]
    fn stop_all_silences_every_channel() {
        let mixer = Mixer::new();
        mixer.play(0, tone(1000, BLOCK_FRAMES), 1.0, true);
        mixer.play(3, tone(2000, BLOCK_FRAMES), 1.0, true);
        mixer.stop_all(StopMode::Immediate);
        assert!(!mixer.is_playing(0));
        assert!(!mixer.is_playing(3));
    }

    #[test]
    fn set_volume_overwrites_previous_value() {
        let mixer = Mixer::new();
        mixer.play(0, tone(1000, BLOCK_FRAMES), 1.0, true);
        mixer.set_volume(0, 0.5);
        let block = mixer.mix_block();
        assert_eq!(block[0], 500);
        mixer.set_volume(0, 0.25);
        let block = mixer.mix_block();
        assert_eq!(block[0], 250);
    }

    #[test]
    fn non_looping_channel_stops_itself_at_end() {
        let mixer = Mixer::new();
        mixer.play(0, tone(1000, 4), 1.0, false);
        mixer.mix_block();
        assert!(!mixer.is_playing(0));
    }

    #[test]
    fn looping_channel_wraps_cursor() {
        let mixer = Mixer::new();
        mixer.play(0, tone(1000, 4), 1.0, true);
        mixer.mix_block();
        assert!(mixer.is_playing(0));
    }
}
