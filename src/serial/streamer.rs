use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};
use serialport::SerialPort;

use crate::error::StreamError;

/// Wake bytes: a couple of blank lines nudge the firmware out of reset.
const WAKE_BYTES: &[u8] = b"\r\n\r\n";
/// How long the firmware needs to finish its boot banner after the wake bytes.
const WAKE_SETTLE: Duration = Duration::from_secs(2);
/// Poll granularity while waiting for an acknowledgment.
const READ_SLICE: Duration = Duration::from_millis(100);

/// One line-oriented channel to the firmware.
///
/// The discipline is strict: `send_line` does not return until the
/// acknowledgment for that line has been consumed, so at most one line is
/// ever outstanding.
pub trait Link: Send {
    /// Run the firmware wake/flush handshake.
    fn wake(&mut self) -> Result<(), StreamError>;
    /// Send one line and block for its single-line acknowledgment.
    fn send_line(&mut self, line: &str) -> Result<String, StreamError>;
    /// Release the channel.
    fn close(&mut self);
}

/// Opens links. The job worker goes through this seam so tests can
/// substitute an in-memory channel for a real port.
pub trait LinkOpener: Send + Sync {
    fn open(
        &self,
        port: &str,
        baud: u32,
        ack_timeout: Duration,
    ) -> Result<Box<dyn Link>, StreamError>;
}

/// Streams lines over a real serial port with a bounded acknowledgment wait.
pub struct SerialStreamer {
    port: Option<Box<dyn SerialPort>>,
    ack_timeout: Duration,
    /// Bytes read past the last consumed newline.
    pending: Vec<u8>,
}

impl SerialStreamer {
    pub fn open(port_name: &str, baud: u32, ack_timeout: Duration) -> Result<Self, StreamError> {
        let port = serialport::new(port_name, baud)
            .timeout(READ_SLICE)
            .open()
            .map_err(|e| StreamError::ChannelOpen {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;
        debug!("opened {port_name} at {baud} baud");
        Ok(Self {
            port: Some(port),
            ack_timeout,
            pending: Vec::new(),
        })
    }
}

impl Link for SerialStreamer {
    fn wake(&mut self) -> Result<(), StreamError> {
        let port = self.port.as_mut().ok_or(StreamError::LinkClosed)?;
        port.write_all(WAKE_BYTES)?;
        port.flush()?;
        // The wake bytes reset the firmware; it is deaf until the boot
        // banner has been emitted, which we then throw away.
        std::thread::sleep(WAKE_SETTLE);
        let _ = port.clear(serialport::ClearBuffer::Input);
        self.pending.clear();
        Ok(())
    }

    fn send_line(&mut self, line: &str) -> Result<String, StreamError> {
        let ack_timeout = self.ack_timeout;
        let port = self.port.as_mut().ok_or(StreamError::LinkClosed)?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        trace!("sent: {line}");
        read_ack(port.as_mut(), &mut self.pending, ack_timeout)
    }

    fn close(&mut self) {
        // port dropped = closed
        self.port = None;
    }
}

/// Block until one full response line arrives or the bound expires.
fn read_ack<R: Read + ?Sized>(
    port: &mut R,
    pending: &mut Vec<u8>,
    bound: Duration,
) -> Result<String, StreamError> {
    let started = Instant::now();
    let mut buf = [0u8; 256];
    loop {
        if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let ack = String::from_utf8_lossy(&line).trim().to_string();
            trace!("ack: {ack}");
            return Ok(ack);
        }
        if started.elapsed() >= bound {
            return Err(StreamError::AckTimeout {
                waited_ms: bound.as_millis() as u64,
            });
        }
        match port.read(&mut buf) {
            // Zero bytes means the device went away, not a pending ack.
            Ok(0) => {
                return Err(StreamError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "serial link closed while awaiting acknowledgment",
                )));
            }
            Ok(n) => pending.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Default opener backed by [`SerialStreamer`].
pub struct SerialLinkOpener;

impl LinkOpener for SerialLinkOpener {
    fn open(
        &self,
        port: &str,
        baud: u32,
        ack_timeout: Duration,
    ) -> Result<Box<dyn Link>, StreamError> {
        Ok(Box::new(SerialStreamer::open(port, baud, ack_timeout)?))
    }
}
