//! Servo input-to-output linear mapping with deadband suppression.

/// Immutable per-axis servo binding.
pub struct ServoAxis {
    pub servo_id: u8,
    pub input_min_us: u32,
    pub input_max_us: u32,
    pub output_min_us: u16,
    pub output_max_us: u16,
    pub max_speed_us_per_sec: u16,
    pub max_accel_us_per_sec2: u16,
    pub max_decel_us_per_sec2: u16,
    pub recoil_jerk_us: u16,
    pub recoil_jerk_variance_us: u16,
}

/// Minimum change in mapped output required to emit a new `SERVO_SET`.
pub const DEADBAND_US: u16 = 5;

/// `round(output_min + (clamp(x, input_min, input_max) - input_min) *
/// (output_max - output_min) / (input_max - input_min))`.
pub fn map_input(x: u32, input_min: u32, input_max: u32, output_min: u16, output_max: u16) -> u16 {
    let clamped = x.clamp(input_min, input_max);
    let input_span = (input_max - input_min).max(1) as f64;
    let output_span = (output_max as i32 - output_min as i32) as f64;
    let ratio = (clamped - input_min) as f64 / input_span;
    (output_min as f64 + ratio * output_span).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_servo_mapping_sequence() {
        let inputs = [1000u32, 1500, 2000, 2003, 2100];
        let expected_outputs = [1200u16, 1550, 1900, 1900, 1900];
        let mut last_sent: Option<u16> = None;
        let mut emitted = Vec::new();
        for &x in &inputs {
            let mapped = map_input(x, 1000, 2000, 1200, 1900);
            assert_eq!(mapped, expected_outputs[emitted.len()]);
            let should_emit = match last_sent {
                None => true,
                Some(prev) => (mapped as i32 - prev as i32).unsigned_abs() as u16 > DEADBAND_US,
            };
            if should_emit {
                emitted.push(mapped);
                last_sent = Some(mapped);
            }
        }
        // 1900 appears for inputs 2000, 2003 (clamped, within deadband)
        // and 2100 (clamped); only the first crossing emits.
        assert_eq!(emitted, vec![1200, 1550, 1900]);
    }

    #[test]
    fn clamps_outside_input_range() {
        assert_eq!(map_input(500, 1000, 2000, 1200, 1900), 1200);
        assert_eq!(map_input(5000, 1000, 2000, 1200, 1900), 1900);
    }
}
