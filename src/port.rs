//! Serial transport for the CGR-101: port scanning, command framing, and
//! bounded binary reads.

use std::io::{ErrorKind, Read, Write};
use std::thread::sleep;
use std::time::Duration;

use crate::{Error, Result};
use crate::proto::{CMD_IDENTIFY, VENDOR_TOKEN};

const BAUD_RATE: u32 = 230400;
const READ_TIMEOUT: Duration = Duration::from_millis(100);
// The unit has no documented command buffer; the settle pause is inherited
// from the vendor driver.
const COMMAND_SETTLE: Duration = Duration::from_millis(100);

// Some ports never show up in enumeration. Probed last.
const FALLBACK_PORTS: [&str; 3] = ["/dev/ttyS0", "/dev/ttyS3", "/dev/ttyS9"];

/// An open connection to the instrument. One command/response exchange at
/// a time; the port stays open for the lifetime of the session.
pub struct Port {
    inner: Box<dyn serialport::SerialPort>,
    name: String,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Port").field("name", &self.name).finish()
    }
}

impl Port {
    /// Open `name` and check that a CGR-101 answers the identity query.
    pub fn probe(name: &str) -> Result<Port> {
        let inner = serialport::new(name, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()?;
        let mut port = Port { inner, name: name.to_owned() };
        port.identify()?;
        log::info!("connected to CGR-101 at {}", port.name);
        Ok(port)
    }

    /// Send the identity query and match the vendor token in the reply. The
    /// identity string is longer than the probe read; the tail is drained so
    /// it cannot be mistaken for a later reply.
    fn identify(&mut self) -> Result<()> {
        self.command(CMD_IDENTIFY)?;
        let reply = self.read_reply(10)?;
        if !String::from_utf8_lossy(&reply).contains(VENDOR_TOKEN) {
            return Err(Error::NotFound);
        }
        self.drain()
    }

    /// Scan for an attached CGR-101.
    ///
    /// Tries `preferred` first, then every enumerated serial port, then the
    /// fallback list. A failure to open or identify any single port is logged
    /// and the scan continues; only exhausting the whole candidate list is
    /// an error.
    pub fn scan(preferred: Option<&str>) -> Result<Port> {
        let mut candidates = Vec::new();
        if let Some(name) = preferred {
            candidates.push(name.to_owned());
        }
        match serialport::available_ports() {
            Ok(ports) => candidates.extend(ports.into_iter().map(|info| info.port_name)),
            Err(error) => log::warn!("could not enumerate serial ports: {}", error),
        }
        candidates.extend(FALLBACK_PORTS.iter().map(|&name| name.to_owned()));
        let mut unique = Vec::with_capacity(candidates.len());
        for name in candidates {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        for name in &unique {
            match Port::probe(name) {
                Ok(port) => return Ok(port),
                Err(error) => log::debug!("could not open {}: {}", name, error),
            }
        }
        Err(Error::NotFound)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one ASCII command, CRLF-terminated.
    pub fn command(&mut self, command: &str) -> Result<()> {
        log::debug!("sent command {:?}", command);
        self.inner.write_all(command.as_bytes())?;
        self.inner.write_all(b"\r\n")?;
        self.inner.flush()?;
        sleep(COMMAND_SETTLE);
        Ok(())
    }

    /// One read of up to `max` bytes; a timeout yields an empty buffer.
    pub fn read_reply(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; max];
        match self.inner.read(&mut buffer) {
            Ok(count) => {
                buffer.truncate(count);
                Ok(buffer)
            }
            Err(error) if error.kind() == ErrorKind::TimedOut => {
                buffer.clear();
                Ok(buffer)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Accumulate up to `limit` bytes, giving up after `max_empty`
    /// consecutive timed-out reads. The result may be short; the caller
    /// decides whether that is an error.
    pub fn read_collect(&mut self, limit: usize, max_empty: u32) -> Result<Vec<u8>> {
        let mut collected = Vec::with_capacity(limit);
        let mut empty_reads = 0;
        while collected.len() < limit && empty_reads < max_empty {
            let chunk = self.read_reply(limit - collected.len())?;
            if chunk.is_empty() {
                empty_reads += 1;
            } else {
                empty_reads = 0;
                collected.extend_from_slice(&chunk);
            }
        }
        log::debug!("collected {} of {} bytes", collected.len(), limit);
        Ok(collected)
    }

    /// Discard anything the unit is still sending.
    pub fn drain(&mut self) -> Result<()> {
        loop {
            let chunk = self.read_reply(100)?;
            if chunk.is_empty() {
                return Ok(());
            }
            log::debug!("flushed {} bytes", chunk.len());
        }
    }
}

#[cfg(test)]
pub(crate) mod loopback {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Port, BAUD_RATE, READ_TIMEOUT};

    /// In-memory stand-in for the instrument: reads consume a canned reply,
    /// writes land in a shared log, an exhausted reply times out.
    pub(crate) struct LoopbackPort {
        reply: VecDeque<u8>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    pub(crate) fn port(reply: &[u8]) -> (Port, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let inner = LoopbackPort {
            reply: reply.iter().copied().collect(),
            written: Arc::clone(&written),
        };
        let port = Port { inner: Box::new(inner), name: "loopback".to_owned() };
        (port, written)
    }

    impl Read for LoopbackPort {
        fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            if self.reply.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "reply exhausted"));
            }
            let count = buffer.len().min(self.reply.len());
            for slot in buffer[..count].iter_mut() {
                *slot = self.reply.pop_front().unwrap();
            }
            Ok(count)
        }
    }

    impl Write for LoopbackPort {
        fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buffer);
            Ok(buffer.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl serialport::SerialPort for LoopbackPort {
        fn name(&self) -> Option<String> {
            Some("loopback".to_owned())
        }

        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(BAUD_RATE)
        }

        fn data_bits(&self) -> serialport::Result<serialport::DataBits> {
            Ok(serialport::DataBits::Eight)
        }

        fn flow_control(&self) -> serialport::Result<serialport::FlowControl> {
            Ok(serialport::FlowControl::None)
        }

        fn parity(&self) -> serialport::Result<serialport::Parity> {
            Ok(serialport::Parity::None)
        }

        fn stop_bits(&self) -> serialport::Result<serialport::StopBits> {
            Ok(serialport::StopBits::One)
        }

        fn timeout(&self) -> Duration {
            READ_TIMEOUT
        }

        fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
            Ok(())
        }

        fn set_data_bits(&mut self, _data_bits: serialport::DataBits) -> serialport::Result<()> {
            Ok(())
        }

        fn set_flow_control(&mut self, _flow_control: serialport::FlowControl)
                -> serialport::Result<()> {
            Ok(())
        }

        fn set_parity(&mut self, _parity: serialport::Parity) -> serialport::Result<()> {
            Ok(())
        }

        fn set_stop_bits(&mut self, _stop_bits: serialport::StopBits) -> serialport::Result<()> {
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> serialport::Result<()> {
            Ok(())
        }

        fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }

        fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }

        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }

        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(self.reply.len() as u32)
        }

        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }

        fn clear(&self, _buffer: serialport::ClearBuffer) -> serialport::Result<()> {
            Ok(())
        }

        fn try_clone(&self) -> serialport::Result<Box<dyn serialport::SerialPort>> {
            Err(serialport::Error::new(
                serialport::ErrorKind::Unknown, "loopback port cannot be cloned"))
        }

        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }

        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const IDENTITY: &[u8] = b"Syscomp CGR-101 Scope V1.6\r\n";

    #[test]
    fn test_identify_drains_the_reply_tail() {
        let (mut port, _written) = loopback::port(IDENTITY);
        port.identify().unwrap();
        // nothing left over to corrupt the next binary exchange
        assert_eq!(port.read_reply(100).unwrap(), Vec::<u8>::new());
        assert_eq!(port.read_collect(3, 2).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_identify_rejects_unknown_devices() {
        let (mut port, _written) = loopback::port(b"ACME Frobulator 9000\r\n");
        assert!(matches!(port.identify(), Err(Error::NotFound)));
    }

    #[test]
    fn test_command_framing() {
        let (mut port, written) = loopback::port(b"");
        port.command("S G").unwrap();
        assert_eq!(written.lock().unwrap().as_slice(), b"S G\r\n");
    }

    #[test]
    fn test_read_collect_returns_short_after_budget() {
        let (mut port, _written) = loopback::port(b"abc");
        assert_eq!(port.read_collect(10, 2).unwrap(), b"abc");
    }
}
