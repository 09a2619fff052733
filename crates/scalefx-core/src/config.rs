//! Structured configuration for the engine and gun effect subsystems.
//!
//! Deserialization format (YAML, via `serde_yaml`) is owned by the
//! `scalefx-app` binary; this module only defines the shape.

use serde::Deserialize;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub gun: GunSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineSection {
    pub enabled: bool,
    pub toggle_channel: String,
    pub toggle_threshold_us: u32,
    pub starting_sound: Option<String>,
    pub running_sound: Option<String>,
    pub stopping_sound: Option<String>,
    #[serde(default)]
    pub starting_volume: f32,
    #[serde(default)]
    pub running_volume: f32,
    #[serde(default)]
    pub stopping_volume: f32,
    pub starting_offset_from_stopping_ms: u32,
    pub stopping_offset_from_starting_ms: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GunSection {
    pub enabled: bool,
    pub trigger_channel: String,
    #[serde(default)]
    pub rates_of_fire: Vec<RateOfFireCfg>,
    #[serde(default)]
    pub smoke: SmokeSection,
    #[serde(default)]
    pub turret: TurretSection,
    /// Serial device path, e.g. `/dev/ttyACM0`. Mutually exclusive with
    /// `device_vid`/`device_pid`.
    pub device_path: Option<String>,
    pub device_vid: Option<u16>,
    pub device_pid: Option<u16>,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
}

fn default_baud() -> u32 {
    115_200
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateOfFireCfg {
    pub rpm: u16,
    pub pwm_threshold_us: u32,
    pub sound_file: String,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_volume() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SmokeSection {
    pub heater_toggle_channel: Option<String>,
    #[serde(default)]
    pub heater_threshold_us: u32,
    #[serde(default)]
    pub fan_off_delay_ms: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TurretSection {
    pub pitch: Option<ServoAxisCfg>,
    pub yaw: Option<ServoAxisCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServoAxisCfg {
    pub input_channel: String,
    pub servo_id: u8,
    pub input_min_us: u32,
    pub input_max_us: u32,
    pub output_min_us: u16,
    pub output_max_us: u16,
    #[serde(default)]
    pub max_speed_us_per_sec: u16,
    #[serde(default)]
    pub max_accel_us_per_sec2: u16,
    #[serde(default)]
    pub max_decel_us_per_sec2: u16,
    #[serde(default)]
    pub recoil_jerk_us: u16,
    #[serde(default)]
    pub recoil_jerk_variance_us: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let yaml = r#"
engine:
  enabled: true
  toggle_channel: "gpio17"
  toggle_threshold_us: 1500
  starting_offset_from_stopping_ms: 25000
  stopping_offset_from_starting_ms: 3000
gun:
  enabled: true
  trigger_channel: "gpio27"
  rates_of_fire:
    - rpm: 600
      pwm_threshold_us: 1200
      sound_file: "slow.wav"
      volume: 0.8
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.engine.enabled);
        assert_eq!(cfg.gun.rates_of_fire.len(), 1);
        assert_eq!(cfg.gun.rates_of_fire[0].rpm, 600);
        assert_eq!(cfg.gun.baud_rate, 115_200);
    }
}
