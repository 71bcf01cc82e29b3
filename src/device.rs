use crate::{Error, Result};
use crate::cal::{Calibration, GainSelection};
use crate::generator::{self, Waveform, WAVEFORM_TABLE_LEN};
use crate::port::Port;
use crate::proto::{self, CAPTURE_POINTS, Channel, ControlRegister, TriggerSource, TriggerSpec};

// Reads are bounded; each empty read burns one 100 ms port timeout.
const BUFFER_EMPTY_READS: u32 = 20;
const MARKER_EMPTY_READS: u32 = 600;

/// A connected CGR-101. Wraps the serial session and speaks the command
/// grammar from [`crate::proto`].
#[derive(Debug)]
pub struct Device {
    port: Port,
}

impl Device {
    /// Scan the serial ports for a unit and open a session to the first one
    /// that identifies itself.
    pub fn scan(preferred_port: Option<&str>) -> Result<Device> {
        let port = Port::scan(preferred_port)?;
        Ok(Device { port })
    }

    pub fn from_port(port: Port) -> Device {
        Device { port }
    }

    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// Hardware reset through the debug register.
    pub fn reset(&mut self) -> Result<()> {
        log::debug!("reset()");
        self.port.command(proto::CMD_RESET_ASSERT)?;
        self.port.command(proto::CMD_RESET_RELEASE)?;
        Ok(())
    }

    /// Query the acquisition state string (`State 1` idle .. `State 6` done).
    pub fn state(&mut self) -> Result<String> {
        self.port.command(proto::CMD_STATE)?;
        let reply = self.port.read_reply(20)?;
        let state = String::from_utf8_lossy(&reply).trim().to_owned();
        log::debug!("state() = {:?}", state);
        Ok(state)
    }

    /// Read the factory offsets stored in EEPROM, in signed counts:
    /// channel A high/low range, then channel B high/low range.
    pub fn eeprom_offsets(&mut self) -> Result<[i8; 4]> {
        self.port.command(proto::CMD_EEPROM_OFFSETS)?;
        let reply = self.port.read_collect(5, BUFFER_EMPTY_READS)?;
        let offsets = proto::decode_eeprom_offsets(&reply)?;
        log::debug!("eeprom_offsets() = {:?}", offsets);
        Ok(offsets)
    }

    pub fn set_gains(&mut self, gains: GainSelection) -> Result<()> {
        log::debug!("set_gains({:?})", gains);
        self.port.command(proto::gain_command(Channel::A, gains.channel_a))?;
        self.port.command(proto::gain_command(Channel::B, gains.channel_b))?;
        Ok(())
    }

    pub fn set_control_register(&mut self, register: ControlRegister) -> Result<()> {
        log::debug!("set_control_register({:?})", register);
        self.port.command(&register.command())
    }

    /// Program the trigger comparator. The level is converted to counts with
    /// the calibration pair of the trigger channel; external and internal
    /// sources arm at mid-scale since no input voltage is compared.
    pub fn set_trigger_level(&mut self, spec: &TriggerSpec, cal: &Calibration,
                             gains: GainSelection) -> Result<()> {
        let counts = match spec.source {
            TriggerSource::ChannelA => {
                let constants = cal.constants(Channel::A, gains.channel_a);
                proto::trigger_level_counts(spec.level_volts, constants.slope, constants.offset)?
            }
            TriggerSource::ChannelB => {
                let constants = cal.constants(Channel::B, gains.channel_b);
                proto::trigger_level_counts(spec.level_volts, constants.slope, constants.offset)?
            }
            TriggerSource::External | TriggerSource::Internal => 511,
        };
        log::debug!("set_trigger_level({:?} V) = {} counts", spec.level_volts, counts);
        self.port.command(&proto::trigger_level_command(counts))
    }

    pub fn set_post_trigger_points(&mut self, spec: &TriggerSpec) -> Result<()> {
        log::debug!("set_post_trigger_points({})", spec.post_trigger_points);
        self.port.command(&proto::post_trigger_command(spec))
    }

    /// Arm the unit, wait for the capture-done marker, and download the
    /// buffer. Sample 0 of the result is the oldest sample in the capture
    /// window.
    pub fn capture_triggered(&mut self) -> Result<proto::RawCapture> {
        self.port.command(proto::CMD_ARM)?;
        let last_address = self.wait_for_trigger()?;
        log::debug!("capture ended at address {}", last_address);
        self.read_capture(last_address)
    }

    /// Capture immediately, ignoring the trigger comparator: arm, route the
    /// trigger to the external input, then toggle the debug force code and
    /// restore the control register. Forced captures carry no last-write
    /// address, so the buffer is not rotated.
    pub fn capture_forced(&mut self, register: ControlRegister) -> Result<proto::RawCapture> {
        self.port.command(proto::CMD_ARM)?;
        self.port.command(&register.forced().command())?;
        log::info!("forcing trigger");
        self.port.command(proto::CMD_FORCE_TRIGGER)?;
        self.port.command(proto::CMD_NORMAL_TRIGGER)?;
        self.port.command(&register.command())?;
        self.read_capture(0)
    }

    /// Poll for the 3-byte done marker. The original driver blocked forever
    /// here; this fails with `CaptureTimeout` once the read budget runs out.
    fn wait_for_trigger(&mut self) -> Result<usize> {
        let marker = self.port.read_collect(3, MARKER_EMPTY_READS)?;
        if marker.len() < 3 {
            return Err(Error::CaptureTimeout);
        }
        proto::decode_done_marker(&marker)
    }

    fn read_capture(&mut self, rotation_offset: usize) -> Result<proto::RawCapture> {
        self.port.command(proto::CMD_READ_BUFFER)?;
        let reply = self.port.read_collect(1 + CAPTURE_POINTS * 4, BUFFER_EMPTY_READS)?;
        log::debug!("got {} bytes of capture data", reply.len());
        proto::decode_capture(&reply, rotation_offset)
    }

    /// Set the generator frequency. Returns the actual frequency after
    /// quantization to the 32-bit phase increment.
    pub fn set_sine_frequency(&mut self, frequency_hz: f64) -> Result<f64> {
        let (word, actual) = generator::frequency_word(frequency_hz);
        log::debug!("set_sine_frequency({} Hz) = {} Hz", frequency_hz, actual);
        let [b3, b2, b1, b0] = word.to_be_bytes();
        self.port.command(&format!("W F {} {} {} {}", b3, b2, b1, b0))?;
        Ok(actual)
    }

    /// Set the generator output amplitude in peak volts. Returns the actual
    /// amplitude after quantization to the 8-bit DAC code.
    pub fn set_output_amplitude(&mut self, volts_peak: f64) -> Result<f64> {
        let (code, actual) = generator::amplitude_code(volts_peak);
        log::debug!("set_output_amplitude({} Vp) = {} Vp", volts_peak, actual);
        self.port.command(&format!("W A {}", code))?;
        Ok(actual)
    }

    /// Program the 256-entry arbitrary waveform table, one entry per command.
    pub fn program_waveform(&mut self, waveform: Waveform) -> Result<()> {
        log::info!("programming {:?} waveform table", waveform);
        let table = waveform.table();
        debug_assert_eq!(table.len(), WAVEFORM_TABLE_LEN);
        for (address, &value) in table.iter().enumerate() {
            self.port.command(&format!("W S {} {}", address, value))?;
        }
        Ok(())
    }

}
