//! Gun effect controller: rate-of-fire selection, looped firing audio,
//! servo mapping, smoke-heater toggling, and the downstream
//! microcontroller link.

mod rate;
mod servo;

pub use rate::{select_rate, RateEntry, IDLE};
pub use servo::{map_input, ServoAxis, DEADBAND_US};

use crate::audio::{Mixer, StopMode};
use crate::pwm::PwmMonitor;
use crate::serial::{commands, Framer};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Control loop tick interval, shared with Engine FX.
pub const TICK: Duration = Duration::from_millis(10);
/// Hysteresis applied to rate selection and the smoke-heater toggle.
pub const DEFAULT_HYSTERESIS_US: u32 = 50;
/// Keepalive cadence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// How long to wait for `INIT_READY` before proceeding anyway.
const INIT_READY_TIMEOUT: Duration = Duration::from_millis(100);
/// Pause after `SHUTDOWN` for the MCU to process before closing the link.
const SHUTDOWN_SETTLE: Duration = Duration::from_millis(50);

pub struct GunConfig {
    pub rates: Vec<RateEntry>,
    pub hysteresis_us: u32,
    pub fan_off_delay_ms: u16,
    pub heater_threshold_us: u32,
    pub pitch: Option<ServoAxis>,
    pub yaw: Option<ServoAxis>,
}

/// Single-writer (the gun loop), multi-reader telemetry surface.
pub struct GunTelemetry {
    is_firing: AtomicBool,
    current_rpm: AtomicU32,
    current_rate_index: AtomicI32,
    smoke_heater_on: AtomicBool,
}

impl GunTelemetry {
    fn new() -> Self {
        GunTelemetry {
            is_firing: AtomicBool::new(false),
            current_rpm: AtomicU32::new(0),
            current_rate_index: AtomicI32::new(IDLE),
            smoke_heater_on: AtomicBool::new(false),
        }
    }

    pub fn is_firing(&self) -> bool {
        self.is_firing.load(Ordering::Acquire)
    }

    pub fn current_rpm(&self) -> u32 {
        self.current_rpm.load(Ordering::Acquire)
    }

    pub fn current_rate_index(&self) -> i32 {
        self.current_rate_index.load(Ordering::Acquire)
    }

    pub fn smoke_heater_on(&self) -> bool {
        self.smoke_heater_on.load(Ordering::Acquire)
    }
}

pub struct GunFx {
    telemetry: Arc<GunTelemetry>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// PWM monitors consumed by the gun loop, exclusively owned by it.
pub struct GunMonitors {
    pub trigger: PwmMonitor,
    pub heater: Option<PwmMonitor>,
    pub pitch: Option<PwmMonitor>,
    pub yaw: Option<PwmMonitor>,
}

impl GunFx {
    /// Runs the startup sequence synchronously and then spawns the
    /// control loop thread.
    pub fn start<P>(
        cfg: GunConfig,
        monitors: GunMonitors,
        mixer: Arc<Mixer>,
        gun_channel: usize,
        mut framer: Framer<P>,
    ) -> Result<Self, String>
    where
        P: Read + Write + Send + 'static,
    {
        framer.send(crate::serial::INIT, &[]).map_err(|e| format!("serial init: {e}"))?;
        let init_deadline = Instant::now() + INIT_READY_TIMEOUT;
        while Instant::now() < init_deadline {
            if let Some(frame) = framer.poll_reply() {
                if frame.frame_type == crate::serial::INIT_READY {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        for axis in [&cfg.pitch, &cfg.yaw].into_iter().flatten() {
            let (t, p) = commands::servo_settings(
                axis.servo_id,
                axis.output_min_us,
                axis.output_max_us,
                axis.max_speed_us_per_sec,
                axis.max_accel_us_per_sec2,
                axis.max_decel_us_per_sec2,
            );
            let _ = framer.send(t, &p);
            let (t, p) =
                commands::servo_recoil(axis.servo_id, axis.recoil_jerk_us, axis.recoil_jerk_variance_us);
            let _ = framer.send(t, &p);
        }

        let telemetry = Arc::new(GunTelemetry::new());
        let running = Arc::new(AtomicBool::new(true));
        let telemetry_t = telemetry.clone();
        let running_t = running.clone();

        let handle = std::thread::Builder::new()
            .name("gun-fx".into())
            .spawn(move || run_loop(cfg, monitors, mixer, gun_channel, framer, telemetry_t, running_t))
            .map_err(|e| format!("failed to spawn gun-fx thread: {e}"))?;

        Ok(GunFx { telemetry, running, handle: Some(handle) })
    }

    pub fn telemetry(&self) -> &GunTelemetry {
        &self.telemetry
    }

    /// Stop the control loop; joins the thread before returning. The
    /// loop itself sends `SHUTDOWN` and settles before exiting.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GunFx {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<P: Read + Write>(
    cfg: GunConfig,
    monitors: GunMonitors,
    mixer: Arc<Mixer>,
    gun_channel: usize,
    mut framer: Framer<P>,
    telemetry: Arc<GunTelemetry>,
    running: Arc<AtomicBool>,
) {
    let mut last_keepalive = Instant::now();
    let mut heater_on = false;
    let mut last_servo: [Option<u16>; 2] = [None, None];

    while running.load(Ordering::Acquire) {
        std::thread::sleep(TICK);

        if let Some(p) = monitors.trigger.average() {
            let prev = telemetry.current_rate_index();
            let next = rate::select_rate(&cfg.rates, prev, p, cfg.hysteresis_us);
            if next != prev {
                apply_rate_change(&cfg, &mixer, gun_channel, &mut framer, &telemetry, prev, next);
            }
        }

        if let Some(monitor) = &monitors.heater {
            if let Some(p) = monitor.average() {
                let on = if p > cfg.heater_threshold_us + cfg.hysteresis_us {
                    true
                } else if p < cfg.heater_threshold_us.saturating_sub(cfg.hysteresis_us) {
                    false
                } else {
                    heater_on
                };
                if on != heater_on {
                    heater_on = on;
                    telemetry.smoke_heater_on.store(on, Ordering::Release);
                    let (t, payload) = commands::smoke_heat(on);
                    if let Err(e) = framer.send(t, &payload) {
                        tracing::warn!(error = %e, "gun fx: smoke heat write failed");
                    }
                }
            }
        }

        for (idx, axis_slot) in [(&monitors.pitch, &cfg.pitch), (&monitors.yaw, &cfg.yaw)]
            .into_iter()
            .enumerate()
        {
            if let (Some(monitor), Some(axis)) = (axis_slot.0.as_ref(), axis_slot.1.as_ref()) {
                if let Some(p) = monitor.average() {
                    let mapped = servo::map_input(
                        p,
                        axis.input_min_us,
                        axis.input_max_us,
                        axis.output_min_us,
                        axis.output_max_us,
                    );
                    let should_emit = match last_servo[idx] {
                        None => true,
                        Some(prev) => {
                            (mapped as i32 - prev as i32).unsigned_abs() as u16 > DEADBAND_US
                        }
                    };
                    if should_emit {
                        last_servo[idx] = Some(mapped);
                        let (t, payload) = commands::servo_set(axis.servo_id, mapped);
                        if let Err(e) = framer.send(t, &payload) {
                            tracing::warn!(error = %e, "gun fx: servo set write failed");
                        }
                    }
                }
            }
        }

        if last_keepalive.elapsed() >= KEEPALIVE_INTERVAL {
            if let Err(e) = framer.send(crate::serial::KEEPALIVE, &[]) {
                tracing::warn!(error = %e, "gun fx: keepalive write failed");
            }
            last_keepalive = Instant::now();
        }

        // Replies are informational only; unknown types are ignored.
        let _ = framer.poll_reply();
    }

    let _ = framer.send(crate::serial::SHUTDOWN, &[]);
    std::thread::sleep(SHUTDOWN_SETTLE);
}

fn apply_rate_change<P: Read + Write>(
    cfg: &GunConfig,
    mixer: &Mixer,
    gun_channel: usize,
    framer: &mut Framer<P>,
    telemetry: &GunTelemetry,
    prev: i32,
    next: i32,
) {
    if next >= 0 {
        let rate = &cfg.rates[next as usize];
        let (t, payload) = commands::trigger_on(rate.rpm);
        if let Err(e) = framer.send(t, &payload) {
            tracing::warn!(error = %e, "gun fx: trigger on write failed");
        }
        if let Some(sound) = &rate.sound {
            mixer.play(gun_channel, sound.clone(), rate.volume, true);
        }
        telemetry.current_rpm.store(rate.rpm as u32, Ordering::Release);
        telemetry.is_firing.store(true, Ordering::Release);
    } else if prev >= 0 {
        let (t, payload) = commands::trigger_off(cfg.fan_off_delay_ms);
        if let Err(e) = framer.send(t, &payload) {
            tracing::warn!(error = %e, "gun fx: trigger off write failed");
        }
        mixer.stop(gun_channel, StopMode::Immediate);
        telemetry.current_rpm.store(0, Ordering::Release);
        telemetry.is_firing.store(false, Ordering::Release);
    }
    telemetry.current_rate_index.store(next, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwm::gpio::SimulatedGpioInput;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct LoopbackPort {
        outbound: Arc<Mutex<Vec<u8>>>,
        inbound: Arc<Mutex<VecDeque<u8>>>,
    }

    impl LoopbackPort {
        fn new() -> Self {
            LoopbackPort {
                outbound: Arc::new(Mutex::new(Vec::new())),
                inbound: Arc::new(Mutex::new(VecDeque::new())),
            }
        }
    }

    impl Read for LoopbackPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut inbound = self.inbound.lock().unwrap();
            if inbound.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "empty"));
            }
            let mut n = 0;
            while n < buf.len() {
                match inbound.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for LoopbackPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() > Duration::from_secs(3) {
                panic!("condition never became true");
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn rate_change_drives_telemetry_and_sends_trigger_frames() {
        let (trigger_input, trigger_feed) = SimulatedGpioInput::new();
        let trigger = PwmMonitor::start(1, Box::new(trigger_input)).unwrap();
        let mixer = Arc::new(Mixer::new());
        let port = LoopbackPort::new();
        let framer = Framer::new(port.clone());

        let cfg = GunConfig {
            rates: vec![RateEntry { rpm: 600, threshold_us: 1200, sound: None, volume: 1.0 }],
            hysteresis_us: 50,
            fan_off_delay_ms: 500,
            heater_threshold_us: 1500,
            pitch: None,
            yaw: None,
        };
        let monitors = GunMonitors { trigger, heater: None, pitch: None, yaw: None };

        let mut gun = GunFx::start(cfg, monitors, mixer, 0, framer).unwrap();
        trigger_feed.push_pulse(1300);
        wait_until(|| gun.telemetry().is_firing());
        assert_eq!(gun.telemetry().current_rpm(), 600);

        trigger_feed.push_pulse(1000);
        wait_until(|| !gun.telemetry().is_firing());

        gun.stop();
        let written = port.outbound.lock().unwrap().clone();
        assert!(!written.is_empty());
    }
}
