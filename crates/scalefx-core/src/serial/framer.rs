//! The [`Framer`]: owns the serial device, encodes outbound commands,
//! and incrementally parses inbound reply frames.

use super::frame::{decode_frame, encode, Frame, MAX_FRAME_BUFFER};
use std::io::{Read, Write};
use std::time::Duration;

/// Either a device path or a USB vendor/product id pair, used to locate
/// the downstream microcontroller at startup.
pub enum DeviceSelector {
    Path(String),
    UsbId { vid: u16, pid: u16 },
}

/// Opens the serial port named or matched by `selector` at `baud_rate`.
/// Failure is a fatal init error for Gun FX.
pub fn open(
    selector: &DeviceSelector,
    baud_rate: u32,
) -> Result<Box<dyn serialport::SerialPort>, String> {
    let path = match selector {
        DeviceSelector::Path(p) => p.clone(),
        DeviceSelector::UsbId { vid, pid } => find_usb_device(*vid, *pid)?,
    };
    serialport::new(&path, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()
        .map_err(|e| format!("opening {path}: {e}"))
}

fn find_usb_device(vid: u16, pid: u16) -> Result<String, String> {
    let ports = serialport::available_ports().map_err(|e| format!("enumerating ports: {e}"))?;
    for port in ports {
        if let serialport::SerialPortType::UsbPort(info) = &port.port_type {
            if info.vid == vid && info.pid == pid {
                return Ok(port.port_name);
            }
        }
    }
    Err(format!("no USB-serial device matching {vid:04x}:{pid:04x}"))
}

/// Encodes outbound command frames and incrementally decodes inbound
/// reply frames from a byte-oriented serial connection. Generic over
/// the underlying port so tests can plug in an in-memory pipe instead
/// of a real `serialport::SerialPort`.
pub struct Framer<P: Read + Write> {
    port: P,
    rx_buffer: Vec<u8>,
    crc_failures: u64,
}

impl<P: Read + Write> Framer<P> {
    pub fn new(port: P) -> Self {
        Framer { port, rx_buffer: Vec::new(), crc_failures: 0 }
    }

    /// Build and write a command frame. Fire-and-forget: partial writes
    /// are retried until the whole frame is written or the sink errors.
    pub fn send(&mut self, frame_type: u8, payload: &[u8]) -> Result<(), String> {
        let wire = encode(frame_type, payload);
        let mut written = 0;
        while written < wire.len() {
            match self.port.write(&wire[written..]) {
                Ok(0) => return Err("serial sink closed".into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }

    /// Non-blocking: drains whatever bytes are available, returning the
    /// first fully-received and CRC-valid reply frame if one completed.
    /// Frames failing CRC are dropped silently and counted. A buffer
    /// exceeding [`MAX_FRAME_BUFFER`] without a terminator is discarded.
    pub fn poll_reply(&mut self) -> Option<Frame> {
        let mut chunk = [0u8; 256];
        loop {
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &chunk[..n] {
                        if byte == 0x00 {
                            let frame = decode_frame(&self.rx_buffer);
                            self.rx_buffer.clear();
                            match frame {
                                Some(f) => return Some(f),
                                None => {
                                    self.crc_failures += 1;
                                    continue;
                                }
                            }
                        }
                        self.rx_buffer.push(byte);
                        if self.rx_buffer.len() > MAX_FRAME_BUFFER {
                            self.rx_buffer.clear();
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(_) => break,
            }
        }
        None
    }

    /// Count of reply frames dropped for failing their CRC check.
    pub fn crc_failure_count(&self) -> u64 {
        self.crc_failures
    }
}

#[cfg(test)]
mod tests {
    use super::super::frame::commands;
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// An in-memory duplex pipe: writes go to `outbound`, reads drain
    /// `inbound`, standing in for a real serial port in tests.
    #[derive(Clone)]
    struct LoopbackPort {
        outbound: Arc<Mutex<Vec<u8>>>,
        inbound: Arc<Mutex<VecDeque<u8>>>,
    }

    impl LoopbackPort {
        fn new() -> Self {
            LoopbackPort { outbound: Arc::new(Mutex::new(Vec::new())), inbound: Arc::new(Mutex::new(VecDeque::new())) }
        }

        fn push_inbound(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().extend(bytes.iter().copied());
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

    #[test]
    fn send_writes_exact_trigger_on_bytes() {
        let port = LoopbackPort::new();
        let mut framer = Framer::new(port.clone());
        let (frame_type, payload) = commands::trigger_on(900);
        framer.send(frame_type, &payload).unwrap();
        let written = port.outbound.lock().unwrap().clone();
        // Last byte is always the COBS terminator.
        assert_eq!(*written.last().unwrap(), 0x00);
        assert!(written.len() > 1);
    }

    #[test]
    fn poll_reply_returns_nothing_with_no_bytes() {
        let port = LoopbackPort::new();
        let mut framer = Framer::new(port);
        assert!(framer.poll_reply().is_none());
    }

    #[test]
    fn poll_reply_decodes_a_complete_inbound_frame() {
        let port = LoopbackPort::new();
        let wire = super::super::frame::encode(super::super::frame::INIT_READY, b"mcu-v1");
        port.push_inbound(&wire);
        let mut framer = Framer::new(port);
        let frame = framer.poll_reply().unwrap();
        assert_eq!(frame.frame_type, super::super::frame::INIT_READY);
        assert_eq!(frame.payload, b"mcu-v1");
    }

    #[test]
    fn poll_reply_drops_crc_failures_and_counts_them() {
        let port = LoopbackPort::new();
        let mut wire = super::super::frame::encode(super::super::frame::STATUS, &[1, 2, 3]);
        let terminator_idx = wire.len() - 1;
        wire[terminator_idx - 1] ^= 0xFF;
        port.push_inbound(&wire);
        let mut framer = Framer::new(port);
        assert!(framer.poll_reply().is_none());
        assert_eq!(framer.crc_failure_count(), 1);
    }
}
