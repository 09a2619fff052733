//! PWM edge-capture + averaging monitors.
//!
//! Each [`PwmMonitor`] owns one background sampler thread that waits for a
//! falling→rising→falling edge sequence on a [`GpioInput`], timestamps the
//! high pulse, and publishes it to any number of non-blocking readers.

pub mod gpio;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub use gpio::{GpioInput, SimulatedGpioInput};

/// Pulse-width timeout: longer pulses are treated as "no signal".
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
/// Averaging window size (number of completed pulses retained).
const WINDOW_SIZE: usize = 10;

/// A single completed pulse measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmSample {
    /// Pulse width in microseconds.
    pub width_us: u32,
    /// Identifier of the input channel this sample came from.
    pub channel: u32,
}

/// Sentinel packed into the latest-sample atomic meaning "no reading yet".
const NO_READING: u64 = u64::MAX;

/// Continuously measures the high-pulse width of a digital input and
/// exposes the latest reading and a rolling average without blocking
/// consumers.
pub struct PwmMonitor {
    channel: u32,
    running: Arc<AtomicBool>,
    /// Packed (width_us as u32) | NO_READING sentinel for "nothing yet".
    latest: Arc<AtomicU64>,
    /// Running sum and count of the averaging window, packed so `average`
    /// never blocks on the sampler for more than a word read.
    window: Arc<Mutex<Window>>,
    handle: Option<JoinHandle<()>>,
}

struct Window {
    samples: std::collections::VecDeque<u32>,
    sum: u64,
}

impl Window {
    fn new() -> Self {
        Window { samples: std::collections::VecDeque::with_capacity(WINDOW_SIZE), sum: 0 }
    }

    fn push(&mut self, width_us: u32) {
        self.samples.push_back(width_us);
        self.sum += width_us as u64;
        if self.samples.len() > WINDOW_SIZE {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted as u64;
            }
        }
    }

    fn average(&self) -> Option<u32> {
        if self.samples.is_empty() {
            None
        } else {
            Some((self.sum / self.samples.len() as u64) as u32)
        }
    }
}

impl PwmMonitor {
    /// Start sampling on `channel` using the given GPIO backend.
    ///
    /// Fails only if a sampler for this monitor is already running;
    /// invalid-channel rejection is the responsibility of `input`.
    pub fn start(channel: u32, input: Box<dyn GpioInput>) -> Result<Self, String> {
        let running = Arc::new(AtomicBool::new(true));
        let latest = Arc::new(AtomicU64::new(NO_READING));
        let window = Arc::new(Mutex::new(Window::new()));

        let running_t = running.clone();
        let latest_t = latest.clone();
        let window_t = window.clone();
        let handle = std::thread::Builder::new()
            .name(format!("pwm-monitor-{channel}"))
            .spawn(move || sampler_loop(channel, input, running_t, latest_t, window_t))
            .map_err(|e| format!("failed to spawn sampler thread: {e}"))?;

        Ok(PwmMonitor { channel, running, latest, window, handle: Some(handle) })
    }

    /// The channel identifier this monitor is sampling.
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Most recent completed pulse width, if any has been observed.
    ///
    /// Always-return-latest semantics: repeated calls with no new pulse
    /// in between return the same sample.
    pub fn latest(&self) -> Option<PwmSample> {
        let raw = self.latest.load(Ordering::Acquire);
        if raw == NO_READING {
            None
        } else {
            Some(PwmSample { width_us: raw as u32, channel: self.channel })
        }
    }

    /// Arithmetic mean of the last [`WINDOW_SIZE`] completed pulses.
    pub fn average(&self) -> Option<u32> {
        self.window.lock().unwrap().average()
    }

    /// Halt sampling. Idempotent; joins the sampler thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PwmMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sampler_loop(
    channel: u32,
    mut input: Box<dyn GpioInput>,
    running: Arc<AtomicBool>,
    latest: Arc<AtomicU64>,
    window: Arc<Mutex<Window>>,
) {
    let mut hw_error_logged = false;
    while running.load(Ordering::Acquire) {
        match measure_pulse(input.as_mut(), DEFAULT_TIMEOUT) {
            Ok(Some(width)) => {
                latest.store(width as u64, Ordering::Release);
                window.lock().unwrap().push(width);
            }
            Ok(None) => {
                // Timeout: no signal. Not an error, nothing to publish.
            }
            Err(e) => {
                if !hw_error_logged {
                    tracing::warn!(channel, error = %e, "pwm monitor: hardware access error, continuing");
                    hw_error_logged = true;
                }
            }
        }
    }
}

/// Measures a single high pulse by waiting for a falling edge, then a
/// rising edge (pulse start), then the next falling edge (pulse end),
/// discarding pulses longer than `timeout`.
///
/// This is the shared edge-to-duration algorithm used by every
/// [`GpioInput`] implementation so the monitor's contract does not depend
/// on which backend is wired in.
pub(crate) fn measure_pulse(
    input: &mut dyn GpioInput,
    timeout: Duration,
) -> Result<Option<u32>, String> {
    input.wait_for_edge(Edge::Falling, timeout)?;
    let rise = match input.wait_for_edge(Edge::Rising, timeout)? {
        Some(t) => t,
        None => return Ok(None),
    };
    let fall = match input.wait_for_edge(Edge::Falling, timeout)? {
        Some(t) => t,
        None => return Ok(None),
    };
    let width = fall.saturating_duration_since(rise);
    if width > timeout {
        Ok(None)
    } else {
        Ok(Some(width.as_micros() as u32))
    }
}

/// Edge direction requested from a [`GpioInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpio::SimulatedGpioInput;

    #[test]
    fn reports_no_reading_before_first_pulse() {
        let (input, _feed) = SimulatedGpioInput::new();
        let monitor = PwmMonitor::start(1, Box::new(input)).unwrap();
        assert_eq!(monitor.latest(), None);
        assert_eq!(monitor.average(), None);
    }

    #[test]
    fn publishes_pulse_and_rolling_average() {
        let (input, feed) = SimulatedGpioInput::new();
        let mut monitor = PwmMonitor::start(1, Box::new(input)).unwrap();
        feed.push_pulse(1500);
        // Give the sampler thread a moment to observe and publish it.
        wait_until(|| monitor.latest().is_some());
        assert_eq!(monitor.latest().unwrap().width_us, 1500);
        assert_eq!(monitor.average(), Some(1500));

        feed.push_pulse(1700);
        wait_until(|| monitor.average() == Some(1600));
        assert_eq!(monitor.average(), Some(1600));
        monitor.stop();
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() > Duration::from_secs(2) {
                panic!("condition never became true");
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
