//! Length-prefixed, CRC-8/COBS serial framing for the PC→MCU link.

mod frame;
mod framer;

pub use frame::{commands, decode_frame, encode, Frame, MAX_FRAME_BUFFER};
pub use frame::{
    INIT, INIT_READY, KEEPALIVE, SERVO_RECOIL, SERVO_SET, SERVO_SETTINGS, SHUTDOWN, SMOKE_HEAT,
    STATUS, TRIGGER_OFF, TRIGGER_ON,
};
pub use framer::{open, DeviceSelector, Framer};
