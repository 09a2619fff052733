//! GPIO backends for [`super::PwmMonitor`].
//!
//! The monitor's edge-capture algorithm is backend-agnostic: it only
//! needs to wait for the next rising or falling edge on a pin, with a
//! timeout. Production code wires in [`RppalGpioInput`]; tests and
//! non-Raspberry-Pi hosts use [`SimulatedGpioInput`].

use super::Edge;
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

/// A source of GPIO edge events for one input pin.
pub trait GpioInput: Send {
    /// Block until the next edge of the given direction occurs, or
    /// `timeout` elapses. `Ok(None)` means timeout (no signal); `Err`
    /// means a hardware access error (logged once by the monitor, not
    /// fatal).
    fn wait_for_edge(&mut self, edge: Edge, timeout: Duration) -> Result<Option<Instant>, String>;
}

/// Raspberry Pi GPIO backend built on `rppal`'s interrupt-driven input
/// pin API.
pub struct RppalGpioInput {
    pin: rppal::gpio::InputPin,
}

impl RppalGpioInput {
    /// Open `bcm_pin` as a pulled-down digital input and arm it for edge
    /// interrupts.
    pub fn new(gpio: &rppal::gpio::Gpio, bcm_pin: u8) -> Result<Self, String> {
        let mut pin = gpio
            .get(bcm_pin)
            .map_err(|e| format!("gpio {bcm_pin}: {e}"))?
            .into_input_pulldown();
        pin.set_interrupt(rppal::gpio::Trigger::Both, None)
            .map_err(|e| format!("gpio {bcm_pin}: set_interrupt: {e}"))?;
        Ok(RppalGpioInput { pin })
    }
}

impl GpioInput for RppalGpioInput {
    fn wait_for_edge(&mut self, edge: Edge, timeout: Duration) -> Result<Option<Instant>, String> {
        loop {
            let now = Instant::now();
            match self
                .pin
                .poll_interrupt(false, Some(timeout))
                .map_err(|e| e.to_string())?
            {
                None => return Ok(None),
                Some(level) => {
                    let matches = match edge {
                        Edge::Rising => level == rppal::gpio::Level::High,
                        Edge::Falling => level == rppal::gpio::Level::Low,
                    };
                    if matches {
                        return Ok(Some(now));
                    }
                    // Wrong direction (the pin toggled the other way while
                    // we were waiting) — loop and keep watching.
                }
            }
        }
    }
}

/// A test/simulation backend driven by an external feed of pulse widths.
///
/// [`SimulatedFeed::push_pulse`] enqueues one complete high pulse. The line
/// is modeled as idle-low between pulses (so a `Falling` wait with no
/// pulse in flight is trivially satisfied), and a `Rising` wait blocks
/// until the next pulse arrives; the matching `Falling` wait then sleeps
/// for the pulse's width before returning, so [`super::measure_pulse`]
/// observes the requested width end to end.
pub struct SimulatedGpioInput {
    rx: Receiver<u32>,
    pending_fall_width: Option<u32>,
}

#[derive(Clone)]
pub struct SimulatedFeed {
    tx: Sender<u32>,
}

impl SimulatedFeed {
    /// Enqueue one pulse of `width_us` microseconds for the monitor to
    /// observe.
    pub fn push_pulse(&self, width_us: u32) {
        let _ = self.tx.send(width_us);
    }
}

impl SimulatedGpioInput {
    pub fn new() -> (Self, SimulatedFeed) {
        let (tx, rx) = std::sync::mpsc::channel();
        (SimulatedGpioInput { rx, pending_fall_width: None }, SimulatedFeed { tx })
    }
}

impl GpioInput for SimulatedGpioInput {
    fn wait_for_edge(&mut self, edge: Edge, timeout: Duration) -> Result<Option<Instant>, String> {
        match edge {
            Edge::Rising => match self.rx.recv_timeout(timeout) {
                Ok(width_us) => {
                    self.pending_fall_width = Some(width_us);
                    Ok(Some(Instant::now()))
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    Err("simulated feed disconnected".into())
                }
            },
            Edge::Falling => match self.pending_fall_width.take() {
                Some(width_us) => {
                    std::thread::sleep(Duration::from_micros(width_us as u64));
                    Ok(Some(Instant::now()))
                }
                // Idle low: no pulse in flight, falling edge is trivially
                // already satisfied.
                None => Ok(Some(Instant::now())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_feed_reproduces_requested_width() {
        let (mut input, feed) = SimulatedGpioInput::new();
        feed.push_pulse(1234);
        let t = Duration::from_millis(200);
        input.wait_for_edge(Edge::Falling, t).unwrap();
        let rise = input.wait_for_edge(Edge::Rising, t).unwrap().unwrap();
        let fall = input.wait_for_edge(Edge::Falling, t).unwrap().unwrap();
        let elapsed = fall.duration_since(rise);
        assert!(elapsed >= Duration::from_micros(1234));
    }

    #[test]
    fn falling_wait_times_out_with_no_pulse() {
        let (mut input, _feed) = SimulatedGpioInput::new();
        let got = input.wait_for_edge(Edge::Rising, Duration::from_millis(20)).unwrap();
        assert!(got.is_none());
    }
}
