//! Engine effect state machine: a four-state controller driven by one
//! PWM toggle input, crossfading three audio tracks with directional
//! time-offsets.

use crate::audio::{Mixer, StopMode};
use crate::pwm::PwmMonitor;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Hysteresis band half-width around the toggle threshold.
pub const DEFAULT_HYSTERESIS_US: u32 = 100;
/// Control loop tick interval.
pub const TICK: Duration = Duration::from_millis(10);
/// How far from the end of the startup sound the running sound is
/// pre-started on a second channel to mask the seam.
pub const DEFAULT_CROSSFADE_MS: u32 = 150;

/// `{Stopped, Starting, Running, Stopping}`, always exactly one held
/// value. Single-writer (the engine loop thread), multi-reader via
/// [`EngineFx::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EngineState::Stopped,
            1 => EngineState::Starting,
            2 => EngineState::Running,
            _ => EngineState::Stopping,
        }
    }
}

/// Immutable engine configuration, loaded once at startup.
pub struct EngineConfig {
    pub starting_sound: Option<crate::audio::Sound>,
    pub starting_volume: f32,
    pub running_sound: Option<crate::audio::Sound>,
    pub running_volume: f32,
    pub stopping_sound: Option<crate::audio::Sound>,
    pub stopping_volume: f32,
    pub toggle_threshold_us: u32,
    pub hysteresis_us: u32,
    pub starting_offset_from_stopping_ms: u32,
    pub stopping_offset_from_starting_ms: u32,
    pub crossfade_ms: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            starting_sound: None,
            starting_volume: 1.0,
            running_sound: None,
            running_volume: 1.0,
            stopping_sound: None,
            stopping_volume: 1.0,
            toggle_threshold_us: 1500,
            hysteresis_us: DEFAULT_HYSTERESIS_US,
            starting_offset_from_stopping_ms: 0,
            stopping_offset_from_starting_ms: 0,
            crossfade_ms: DEFAULT_CROSSFADE_MS,
        }
    }
}

/// Toggle reading derived from the PWM average with a hysteresis band
/// around `threshold_us`.
fn toggle_on(average_us: u32, threshold_us: u32, hysteresis_us: u32, was_on: bool) -> bool {
    if average_us > threshold_us + hysteresis_us {
        true
    } else if average_us < threshold_us.saturating_sub(hysteresis_us) {
        false
    } else {
        was_on
    }
}

/// Runs the engine state machine on a dedicated thread, consuming one
/// [`PwmMonitor`] and driving two [`Mixer`] channels (primary + the
/// crossfade-overlap channel).
pub struct EngineFx {
    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EngineFx {
    pub fn start(
        cfg: EngineConfig,
        monitor: PwmMonitor,
        mixer: Arc<Mixer>,
        primary_channel: usize,
        overlap_channel: usize,
    ) -> Self {
        let state = Arc::new(AtomicU8::new(EngineState::Stopped as u8));
        let running = Arc::new(AtomicBool::new(true));

        let state_t = state.clone();
        let running_t = running.clone();
        let handle = std::thread::Builder::new()
            .name("engine-fx".into())
            .spawn(move || {
                run_loop(cfg, monitor, mixer, primary_channel, overlap_channel, state_t, running_t)
            })
            .expect("spawn engine-fx thread");

        EngineFx { state, running, handle: Some(handle) }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Request the control loop stop; joins the thread before returning.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EngineFx {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play(mixer: &Mixer, channel: usize, sound: &Option<crate::audio::Sound>, volume: f32, looping: bool, offset_ms: u32) {
    if let Some(sound) = sound {
        mixer.play_from(channel, sound.clone(), volume, looping, offset_ms);
    }
    // Missing sound: state still advances silently.
}

fn run_loop(
    cfg: EngineConfig,
    monitor: PwmMonitor,
    mixer: Arc<Mixer>,
    primary: usize,
    overlap: usize,
    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
) {
    let mut toggle = false;
    let mut crossfaded = false;

    while running.load(Ordering::Acquire) {
        std::thread::sleep(TICK);

        if let Some(average) = monitor.average() {
            toggle = toggle_on(average, cfg.toggle_threshold_us, cfg.hysteresis_us, toggle);
        }

        let current = EngineState::from_u8(state.load(Ordering::Acquire));
        let next = match current {
            EngineState::Stopped => {
                if toggle {
                    play(&mixer, primary, &cfg.starting_sound, cfg.starting_volume, false, 0);
                    Some(EngineState::Starting)
                } else {
                    None
                }
            }
            EngineState::Starting => {
                if !toggle {
                    mixer.stop(primary, StopMode::Immediate);
                    mixer.stop(overlap, StopMode::Immediate);
                    play(
                        &mixer,
                        primary,
                        &cfg.stopping_sound,
                        cfg.stopping_volume,
                        false,
                        cfg.stopping_offset_from_starting_ms,
                    );
                    crossfaded = false;
                    Some(EngineState::Stopping)
                } else if !mixer.is_playing(primary) {
                    // Startup sound finished (or none was configured):
                    // commit to the running loop on the primary channel.
                    play(&mixer, primary, &cfg.running_sound, cfg.running_volume, true, 0);
                    mixer.stop(overlap, StopMode::Immediate);
                    crossfaded = false;
                    Some(EngineState::Running)
                } else {
                    if let Some(ms) = mixer.remaining_ms(primary) {
                        if ms <= cfg.crossfade_ms && !crossfaded {
                            play(&mixer, overlap, &cfg.running_sound, cfg.running_volume, true, 0);
                            crossfaded = true;
                        }
                    }
                    None
                }
            }
            EngineState::Running => {
                if !toggle {
                    mixer.stop(primary, StopMode::Immediate);
                    mixer.stop(overlap, StopMode::Immediate);
                    play(&mixer, primary, &cfg.stopping_sound, cfg.stopping_volume, false, 0);
                    Some(EngineState::Stopping)
                } else {
                    None
                }
            }
            EngineState::Stopping => {
                if toggle {
                    mixer.stop(primary, StopMode::Immediate);
                    play(
                        &mixer,
                        primary,
                        &cfg.starting_sound,
                        cfg.starting_volume,
                        false,
                        cfg.starting_offset_from_stopping_ms,
                    );
                    crossfaded = false;
                    Some(EngineState::Starting)
                } else if !mixer.is_playing(primary) {
                    Some(EngineState::Stopped)
                } else {
                    None
                }
            }
        };

        if let Some(next) = next {
            state.store(next as u8, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Mixer, Sound};
    use crate::pwm::gpio::SimulatedGpioInput;

    fn short_sound(frames: usize) -> Sound {
        Sound::from_stereo_samples(vec![100i16; frames * 2], crate::audio::OUTPUT_SAMPLE_RATE)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = std::time::Instant::now();
        while !cond() {
            if start.elapsed() > Duration::from_secs(3) {
                panic!("condition never became true");
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn cold_start_transitions_through_starting_to_running() {
        let (input, feed) = SimulatedGpioInput::new();
        let monitor = PwmMonitor::start(1, Box::new(input)).unwrap();
        let mixer = Arc::new(Mixer::new());
        // Drive the mixer's block clock so channel cursors actually
        // advance, the way a real output sink would.
        let _sink = crate::audio::NullSink::start(mixer.clone());

        // Short startup sound so the state machine reaches Running
        // quickly without waiting out a long crossfade window.
        let cfg = EngineConfig {
            starting_sound: Some(short_sound(50)),
            running_sound: Some(short_sound(10_000)),
            stopping_sound: Some(short_sound(50)),
            toggle_threshold_us: 1500,
            crossfade_ms: 0,
            ..EngineConfig::default()
        };
        let mut engine = EngineFx::start(cfg, monitor, mixer, 0, 1);

        assert_eq!(engine.state(), EngineState::Stopped);
        feed.push_pulse(1700);
        wait_until(|| engine.state() == EngineState::Starting);

        wait_until(|| engine.state() == EngineState::Running);

        feed.push_pulse(1000);
        wait_until(|| engine.state() == EngineState::Stopping);

        engine.stop();
    }

    #[test]
    fn toggle_holds_state_inside_hysteresis_band() {
        assert!(toggle_on(1601, 1500, 100, false));
        assert!(!toggle_on(1599, 1500, 100, false));
        assert!(toggle_on(1550, 1500, 100, true));
        assert!(!toggle_on(1550, 1500, 100, false));
    }
}
