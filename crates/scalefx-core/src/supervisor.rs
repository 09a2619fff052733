//! Composition root: builds every subsystem from a [`Config`], starts
//! them in dependency order, and tears them down in reverse on
//! shutdown.

use crate::audio::{AudioBackend, AudioOutput, Mixer, Sound};
use crate::config::Config;
use crate::engine::{EngineConfig, EngineFx};
use crate::error::CoreError;
use crate::gun::{GunConfig, GunFx, GunMonitors, RateEntry, ServoAxis};
use crate::pwm::gpio::RppalGpioInput;
use crate::pwm::PwmMonitor;
use crate::serial::{DeviceSelector, Framer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Mixer channel assignments. Fixed at composition time.
const ENGINE_PRIMARY_CHANNEL: usize = 0;
const ENGINE_OVERLAP_CHANNEL: usize = 1;
const GUN_CHANNEL: usize = 2;

/// Owns every running subsystem. Dropping (or calling [`Supervisor::shutdown`])
/// tears them down in reverse startup order: Gun FX, Engine FX, Mixer,
/// PWM substrate.
pub struct Supervisor {
    engine: Option<EngineFx>,
    gun: Option<GunFx>,
    _audio_output: Option<AudioOutput>,
    mixer: Arc<Mixer>,
    run_flag: Arc<AtomicBool>,
}

impl Supervisor {
    /// Builds and starts every enabled subsystem in order: Audio Mixer
    /// → sound registry → PWM substrate → Engine FX → Gun FX → main
    /// wait loop (the wait loop itself is driven by the caller via
    /// [`Supervisor::run_flag`]).
    ///
    /// A missing audio device is a fatal hardware-init error, the same
    /// as a missing GPIO substrate or serial device; pass
    /// [`AudioBackend::Null`] to run without a real device instead.
    pub fn start(
        config: Config,
        gpio: Option<rppal::gpio::Gpio>,
        audio_backend: AudioBackend,
    ) -> Result<Self, CoreError> {
        let mixer = Arc::new(Mixer::new());
        let (mixer, audio_output) = crate::audio::start_audio(mixer, audio_backend)?;

        let mut sounds: HashMap<String, Sound> = HashMap::new();
        let mut load_sound = |path: &str| -> Result<Sound, CoreError> {
            if let Some(existing) = sounds.get(path) {
                return Ok(existing.clone());
            }
            let sound = Sound::load(path)
                .map_err(|e| CoreError::AudioInit(format!("loading {path}: {e}")))?;
            sounds.insert(path.to_string(), sound.clone());
            Ok(sound)
        };

        let run_flag = Arc::new(AtomicBool::new(true));

        let engine = if config.engine.enabled {
            let monitor = open_monitor(&config.engine.toggle_channel, gpio.as_ref())?;
            let cfg = EngineConfig {
                starting_sound: config
                    .engine
                    .starting_sound
                    .as_deref()
                    .map(&mut load_sound)
                    .transpose()?,
                starting_volume: config.engine.starting_volume,
                running_sound: config
                    .engine
                    .running_sound
                    .as_deref()
                    .map(&mut load_sound)
                    .transpose()?,
                running_volume: config.engine.running_volume,
                stopping_sound: config
                    .engine
                    .stopping_sound
                    .as_deref()
                    .map(&mut load_sound)
                    .transpose()?,
                stopping_volume: config.engine.stopping_volume,
                toggle_threshold_us: config.engine.toggle_threshold_us,
                hysteresis_us: crate::engine::DEFAULT_HYSTERESIS_US,
                starting_offset_from_stopping_ms: config.engine.starting_offset_from_stopping_ms,
                stopping_offset_from_starting_ms: config.engine.stopping_offset_from_starting_ms,
                crossfade_ms: crate::engine::DEFAULT_CROSSFADE_MS,
            };
            Some(EngineFx::start(
                cfg,
                monitor,
                mixer.clone(),
                ENGINE_PRIMARY_CHANNEL,
                ENGINE_OVERLAP_CHANNEL,
            ))
        } else {
            None
        };

        let gun = if config.gun.enabled {
            Some(start_gun(&config, &mut load_sound, &mixer, gpio.as_ref())?)
        } else {
            None
        };

        Ok(Supervisor { engine, gun, _audio_output: Some(audio_output), mixer, run_flag })
    }

    /// Atomic flag the process signal handler clears to request
    /// shutdown.
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        self.run_flag.clone()
    }

    pub fn mixer(&self) -> Arc<Mixer> {
        self.mixer.clone()
    }

    /// Synchronous, ordered teardown: stop Gun FX, stop Engine FX,
    /// destroy Mixer, release PWM substrate. Each stop joins its
    /// background thread before returning.
    pub fn shutdown(mut self) {
        if let Some(mut gun) = self.gun.take() {
            gun.stop();
        }
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
        }
        self._audio_output.take();
    }
}

fn open_monitor(channel: &str, gpio: Option<&rppal::gpio::Gpio>) -> Result<PwmMonitor, CoreError> {
    let bcm_pin: u8 = channel
        .trim_start_matches("gpio")
        .parse()
        .map_err(|_| CoreError::HardwareInit(format!("invalid channel identifier: {channel}")))?;
    let gpio = gpio.ok_or_else(|| CoreError::HardwareInit("no GPIO substrate available".into()))?;
    let input = RppalGpioInput::new(gpio, bcm_pin)
        .map_err(|e| CoreError::HardwareInit(format!("{channel}: {e}")))?;
    PwmMonitor::start(bcm_pin as u32, Box::new(input)).map_err(CoreError::HardwareInit)
}

fn start_gun(
    config: &Config,
    load_sound: &mut impl FnMut(&str) -> Result<Sound, CoreError>,
    mixer: &Arc<Mixer>,
    gpio: Option<&rppal::gpio::Gpio>,
) -> Result<GunFx, CoreError> {
    let gun_cfg = &config.gun;

    let selector = match (&gun_cfg.device_path, gun_cfg.device_vid, gun_cfg.device_pid) {
        (Some(path), _, _) => DeviceSelector::Path(path.clone()),
        (None, Some(vid), Some(pid)) => DeviceSelector::UsbId { vid, pid },
        _ => {
            return Err(CoreError::SerialInit(
                "gun config needs device_path or device_vid+device_pid".into(),
            ))
        }
    };
    let port = crate::serial::open(&selector, gun_cfg.baud_rate)
        .map_err(CoreError::SerialInit)?;
    let framer = Framer::new(port);

    let mut rates = Vec::with_capacity(gun_cfg.rates_of_fire.len());
    for entry in &gun_cfg.rates_of_fire {
        rates.push(RateEntry {
            rpm: entry.rpm,
            threshold_us: entry.pwm_threshold_us,
            sound: Some(load_sound(&entry.sound_file)?),
            volume: entry.volume,
        });
    }

    let trigger = open_monitor(&gun_cfg.trigger_channel, gpio)?;
    let heater = gun_cfg
        .smoke
        .heater_toggle_channel
        .as_deref()
        .map(|ch| open_monitor(ch, gpio))
        .transpose()?;
    let pitch_monitor = gun_cfg
        .turret
        .pitch
        .as_ref()
        .map(|axis| open_monitor(&axis.input_channel, gpio))
        .transpose()?;
    let yaw_monitor = gun_cfg
        .turret
        .yaw
        .as_ref()
        .map(|axis| open_monitor(&axis.input_channel, gpio))
        .transpose()?;

    let pitch = gun_cfg.turret.pitch.as_ref().map(to_servo_axis);
    let yaw = gun_cfg.turret.yaw.as_ref().map(to_servo_axis);

    let cfg = GunConfig {
        rates,
        hysteresis_us: crate::gun::DEFAULT_HYSTERESIS_US,
        fan_off_delay_ms: gun_cfg.smoke.fan_off_delay_ms,
        heater_threshold_us: gun_cfg.smoke.heater_threshold_us,
        pitch,
        yaw,
    };
    let monitors = GunMonitors { trigger, heater, pitch: pitch_monitor, yaw: yaw_monitor };

    GunFx::start(cfg, monitors, mixer.clone(), GUN_CHANNEL, framer)
        .map_err(CoreError::HardwareInit)
}

fn to_servo_axis(cfg: &crate::config::ServoAxisCfg) -> ServoAxis {
    ServoAxis {
        servo_id: cfg.servo_id,
        input_min_us: cfg.input_min_us,
        input_max_us: cfg.input_max_us,
        output_min_us: cfg.output_min_us,
        output_max_us: cfg.output_max_us,
        max_speed_us_per_sec: cfg.max_speed_us_per_sec,
        max_accel_us_per_sec2: cfg.max_accel_us_per_sec2,
        max_decel_us_per_sec2: cfg.max_decel_us_per_sec2,
        recoil_jerk_us: cfg.recoil_jerk_us,
        recoil_jerk_variance_us: cfg.recoil_jerk_variance_us,
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(mut gun) = self.gun.take() {
            gun.stop();
        }
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
        }
        let _ = self.run_flag.compare_exchange(
            true,
            false,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }
}
