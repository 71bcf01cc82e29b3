//! Command grammar and binary reply decoding for the CGR-101.
//!
//! Commands are short ASCII strings terminated by CRLF. Replies to buffer and
//! status queries are raw binary: a one-byte marker followed by payload bytes.

use crate::{Error, Result};

/// Samples in one capture, per channel. The unit transfers 2048 samples per
/// capture, interleaving both channels.
pub const CAPTURE_POINTS: usize = 1024;

/// Maximum sample rate in Hz. Achievable rates are `20 MHz / 2^N`, N in 0..=15.
pub const BASE_SAMPLE_RATE: f64 = 20e6;

pub(crate) const CMD_IDENTIFY: &str = "i";
pub(crate) const VENDOR_TOKEN: &str = "Syscomp";
pub(crate) const CMD_ARM: &str = "S G";
pub(crate) const CMD_READ_BUFFER: &str = "S B";
pub(crate) const CMD_STATE: &str = "S S";
pub(crate) const CMD_EEPROM_OFFSETS: &str = "S O";
pub(crate) const CMD_RESET_ASSERT: &str = "S D 1";
pub(crate) const CMD_RESET_RELEASE: &str = "S D 0";
pub(crate) const CMD_FORCE_TRIGGER: &str = "S D 5";
pub(crate) const CMD_NORMAL_TRIGGER: &str = "S D 4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
}

/// Input attenuation matched to the attached probe. The hardware does not
/// switch a divider; the setting selects which calibration pair applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ProbeGain {
    #[default]
    #[serde(rename = "1x")]
    X1,
    #[serde(rename = "10x")]
    X10,
}

/// `S P` command selecting the gain for one channel. Uppercase selects 1x,
/// lowercase 10x.
pub(crate) fn gain_command(channel: Channel, gain: ProbeGain) -> &'static str {
    match (channel, gain) {
        (Channel::A, ProbeGain::X1)  => "S P A",
        (Channel::A, ProbeGain::X10) => "S P a",
        (Channel::B, ProbeGain::X1)  => "S P B",
        (Channel::B, ProbeGain::X10) => "S P b",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    #[serde(rename = "a")]
    ChannelA,
    #[serde(rename = "b")]
    ChannelB,
    External,
    /// Captures are forced through the debug register, ignoring the inputs.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPolarity {
    #[default]
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerSpec {
    pub source: TriggerSource,
    pub level_volts: f64,
    pub polarity: TriggerPolarity,
    pub post_trigger_points: u32,
}

impl TriggerSpec {
    /// Create a validated trigger specification.
    ///
    /// The unit always records [`CAPTURE_POINTS`] samples; `post_trigger_points`
    /// selects how many of them fall after the trigger. The original firmware
    /// driver silently substituted 500 for an over-large window; that is
    /// rejected here instead.
    pub fn new(source: TriggerSource, level_volts: f64, polarity: TriggerPolarity,
               post_trigger_points: u32) -> Result<TriggerSpec> {
        if post_trigger_points > CAPTURE_POINTS as u32 {
            return Err(Error::PostTriggerTooLarge { points: post_trigger_points });
        }
        Ok(TriggerSpec { source, level_volts, polarity, post_trigger_points })
    }
}

bitflags::bitflags! {
    /// Trigger routing bits of the control register. Bits 0..=3 hold the
    /// sample rate divisor exponent and are kept outside the flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlFlags: u8 {
        const TRIGGER_CHANNEL_B = 1 << 4;
        const FALLING_EDGE      = 1 << 5;
        const EXTERNAL_TRIGGER  = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRegister {
    rate_bits: u8,
    flags: ControlFlags,
}

impl ControlRegister {
    /// Derive the register value for a requested sample rate and trigger
    /// routing. Returns the register together with the actual, quantized
    /// sample rate in Hz.
    pub fn derive(sample_rate_hz: f64, source: TriggerSource, polarity: TriggerPolarity)
            -> (ControlRegister, f64) {
        let (rate_bits, actual_rate) = sample_rate_bits(sample_rate_hz);
        let mut flags = ControlFlags::empty();
        match source {
            TriggerSource::ChannelA => {}
            TriggerSource::ChannelB => flags.insert(ControlFlags::TRIGGER_CHANNEL_B),
            TriggerSource::External => flags.insert(ControlFlags::EXTERNAL_TRIGGER),
            // internal triggers are forced through the debug register; the
            // routing bits stay clear like a channel A setup
            TriggerSource::Internal => {}
        }
        if let TriggerPolarity::Falling = polarity {
            flags.insert(ControlFlags::FALLING_EDGE);
        }
        (ControlRegister { rate_bits, flags }, actual_rate)
    }

    pub fn bits(self) -> u8 {
        self.rate_bits | self.flags.bits()
    }

    pub fn actual_rate(self) -> f64 {
        BASE_SAMPLE_RATE / f64::from(1u32 << self.rate_bits)
    }

    /// Same register with the external trigger bit set, used while forcing
    /// a trigger through the debug codes.
    pub(crate) fn forced(self) -> ControlRegister {
        ControlRegister { rate_bits: self.rate_bits, flags: self.flags | ControlFlags::EXTERNAL_TRIGGER }
    }

    pub(crate) fn command(self) -> String {
        format!("S R {}", self.bits())
    }
}

/// Quantize a requested sample rate to the nearest achievable rate.
///
/// Returns the 4-bit divisor exponent N and the actual rate `20 MHz / 2^N`.
/// Exact ties keep the lower N; the strict-improvement comparison below makes
/// that deterministic.
pub fn sample_rate_bits(requested_hz: f64) -> (u8, f64) {
    let mut best_n = 0u8;
    let mut best_rate = BASE_SAMPLE_RATE;
    for n in 0..16u8 {
        let rate = BASE_SAMPLE_RATE / f64::from(1u32 << n);
        if (rate - requested_hz).abs() < (best_rate - requested_hz).abs() {
            best_n = n;
            best_rate = rate;
        }
    }
    (best_n, best_rate)
}

/// Convert a trigger level in volts to ADC counts using the calibration pair
/// of the trigger channel.
///
/// The original driver wrapped the result modulo 65536 before splitting it
/// into bytes, so an out-of-range level silently armed the unit at an
/// unrelated voltage. Out-of-range counts are an error here.
pub fn trigger_level_counts(level_volts: f64, slope: f64, offset: f64) -> Result<u16> {
    let counts = 511.0 - offset - level_volts / slope;
    if !(0.0..=1023.0).contains(&counts) {
        return Err(Error::TriggerLevelOutOfRange { counts: counts as i32 });
    }
    Ok(counts as u16)
}

pub(crate) fn trigger_level_command(counts: u16) -> String {
    format!("S T {} {}", counts >> 8, counts & 0xff)
}

pub(crate) fn post_trigger_command(spec: &TriggerSpec) -> String {
    let points = spec.post_trigger_points as u16;
    format!("S C {} {}", points >> 8, points & 0xff)
}

/// One decoded capture, 10-bit unsigned samples centered at 511.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    pub channel_a: Vec<u16>,
    pub channel_b: Vec<u16>,
}

/// Decode the `S B` buffer reply.
///
/// The reply is one marker byte followed by 2048 big-endian 16-bit words,
/// alternating channel A and channel B. The capture buffer is a ring; for
/// triggered captures `rotation_offset` is the last write address reported by
/// the done marker, for forced captures it is 0. After de-interleaving, each
/// channel is rotated so sample 0 is the oldest sample in the buffer.
pub fn decode_capture(reply: &[u8], rotation_offset: usize) -> Result<RawCapture> {
    let expected = 1 + CAPTURE_POINTS * 2 * 2;
    if reply.len() < expected {
        return Err(Error::ShortCapture { expected, actual: reply.len() });
    }
    let mut channel_a = Vec::with_capacity(CAPTURE_POINTS);
    let mut channel_b = Vec::with_capacity(CAPTURE_POINTS);
    for (index, word) in reply[1..expected].chunks_exact(2).enumerate() {
        let sample = u16::from_be_bytes([word[0], word[1]]);
        if index % 2 == 0 {
            channel_a.push(sample);
        } else {
            channel_b.push(sample);
        }
    }
    channel_a.rotate_left(rotation_offset % CAPTURE_POINTS);
    channel_b.rotate_left(rotation_offset % CAPTURE_POINTS);
    Ok(RawCapture { channel_a, channel_b })
}

/// Decode the 3-byte capture-done marker: `A`, then the last write address
/// as a big-endian 16-bit word.
pub(crate) fn decode_done_marker(reply: &[u8]) -> Result<usize> {
    match reply {
        [_marker, high, low, ..] =>
            Ok(usize::from(*high) << 8 | usize::from(*low)),
        _ =>
            Err(Error::ShortCapture { expected: 3, actual: reply.len() }),
    }
}

/// Decode the `S O` reply: marker byte, then four signed offset bytes for
/// channel A high/low range and channel B high/low range.
pub(crate) fn decode_eeprom_offsets(reply: &[u8]) -> Result<[i8; 4]> {
    match reply {
        [_marker, a_high, a_low, b_high, b_low, ..] =>
            Ok([*a_high as i8, *a_low as i8, *b_high as i8, *b_low as i8]),
        _ =>
            Err(Error::ShortCapture { expected: 5, actual: reply.len() }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rate_quantization_exact() {
        for n in 0..16u8 {
            let rate = BASE_SAMPLE_RATE / f64::from(1u32 << n);
            assert_eq!(sample_rate_bits(rate), (n, rate));
        }
    }

    #[test]
    fn test_rate_quantization_nearest() {
        // 100 kHz sits between 156.25 kHz (N=7) and 78.125 kHz (N=8)
        let (n, actual) = sample_rate_bits(100e3);
        assert_eq!(n, 8);
        assert_eq!(actual, 78125.0);
        let (n, actual) = sample_rate_bits(130e3);
        assert_eq!(n, 7);
        assert_eq!(actual, 156250.0);
    }

    #[test]
    fn test_rate_quantization_tie_takes_lower_n() {
        // 15 MHz is equidistant from 20 MHz and 10 MHz
        let (n, actual) = sample_rate_bits(15e6);
        assert_eq!(n, 0);
        assert_eq!(actual, 20e6);
    }

    #[test]
    fn test_rate_quantization_clamps() {
        assert_eq!(sample_rate_bits(1e9), (0, 20e6));
        let (n, actual) = sample_rate_bits(1.0);
        assert_eq!(n, 15);
        assert!((actual - 610.3515625).abs() < 1e-9);
    }

    #[test]
    fn test_gain_commands() {
        assert_eq!(gain_command(Channel::A, ProbeGain::X1),  "S P A");
        assert_eq!(gain_command(Channel::A, ProbeGain::X10), "S P a");
        assert_eq!(gain_command(Channel::B, ProbeGain::X1),  "S P B");
        assert_eq!(gain_command(Channel::B, ProbeGain::X10), "S P b");
    }

    #[test]
    fn test_control_register_layout() {
        let (reg, actual) = ControlRegister::derive(
            100e3, TriggerSource::ChannelB, TriggerPolarity::Falling);
        assert_eq!(actual, 78125.0);
        assert_eq!(reg.bits(), 8 | 1 << 4 | 1 << 5);
        assert_eq!(reg.command(), format!("S R {}", 8 | 1 << 4 | 1 << 5));

        let (reg, _) = ControlRegister::derive(
            20e6, TriggerSource::External, TriggerPolarity::Rising);
        assert_eq!(reg.bits(), 1 << 6);
        assert_eq!(reg.forced().bits(), 1 << 6);

        let (reg, _) = ControlRegister::derive(
            20e6, TriggerSource::ChannelA, TriggerPolarity::Rising);
        assert_eq!(reg.bits(), 0);
        assert_eq!(reg.forced().bits(), 1 << 6);
    }

    #[test]
    fn test_trigger_level_counts() {
        // 0 V with a unity slope and no offset is mid-scale
        assert_eq!(trigger_level_counts(0.0, 1.0, 0.0).unwrap(), 511);
        assert_eq!(trigger_level_counts(-1.0, 1.0, 0.0).unwrap(), 512);
        assert_eq!(trigger_level_counts(0.05, 0.0445, 0.0).unwrap(), 509);
        assert!(matches!(trigger_level_counts(-25.0, 0.0445, 0.0),
            Err(Error::TriggerLevelOutOfRange { .. })));
        assert!(matches!(trigger_level_counts(25.0, 0.0445, 0.0),
            Err(Error::TriggerLevelOutOfRange { .. })));
    }

    #[test]
    fn test_trigger_level_command_split() {
        assert_eq!(trigger_level_command(511), "S T 1 255");
        assert_eq!(trigger_level_command(1023), "S T 3 255");
        assert_eq!(trigger_level_command(0), "S T 0 0");
    }

    #[test]
    fn test_post_trigger_window() {
        let spec = TriggerSpec::new(
            TriggerSource::ChannelA, 0.0, TriggerPolarity::Rising, 512).unwrap();
        assert_eq!(post_trigger_command(&spec), "S C 2 0");
        assert!(matches!(
            TriggerSpec::new(TriggerSource::ChannelA, 0.0, TriggerPolarity::Rising, 1025),
            Err(Error::PostTriggerTooLarge { points: 1025 })));
    }

    fn synthetic_reply() -> Vec<u8> {
        // channel A counts up from 0, channel B counts down from 2047
        let mut reply = vec![0x41];
        for sample in 0..2048u16 {
            let word = if sample % 2 == 0 { sample / 2 } else { 2047 - sample / 2 };
            reply.extend_from_slice(&word.to_be_bytes());
        }
        reply
    }

    #[test]
    fn test_decode_capture_no_rotation() {
        let capture = decode_capture(&synthetic_reply(), 0).unwrap();
        assert_eq!(capture.channel_a.len(), CAPTURE_POINTS);
        assert_eq!(capture.channel_b.len(), CAPTURE_POINTS);
        assert_eq!(capture.channel_a[0], 0);
        assert_eq!(capture.channel_a[1023], 1023);
        assert_eq!(capture.channel_b[0], 2047);
        assert_eq!(capture.channel_b[1023], 1024);
    }

    #[test]
    fn test_decode_capture_rotation() {
        let capture = decode_capture(&synthetic_reply(), 512).unwrap();
        assert_eq!(capture.channel_a[0], 512);
        assert_eq!(capture.channel_a[511], 1023);
        assert_eq!(capture.channel_a[512], 0);
        assert_eq!(capture.channel_a[1023], 511);
        assert_eq!(capture.channel_b[0], 2047 - 512);
    }

    #[test]
    fn test_decode_capture_full_rotation_is_identity() {
        let plain = decode_capture(&synthetic_reply(), 0).unwrap();
        let rotated = decode_capture(&synthetic_reply(), 1024).unwrap();
        assert_eq!(plain, rotated);
    }

    #[test]
    fn test_decode_capture_short_reply() {
        let reply = synthetic_reply();
        match decode_capture(&reply[..1000], 0) {
            Err(Error::ShortCapture { expected: 4097, actual: 1000 }) => {}
            other => panic!("expected short capture error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_done_marker() {
        assert_eq!(decode_done_marker(&[0x41, 0x02, 0x00]).unwrap(), 512);
        assert_eq!(decode_done_marker(&[0x41, 0x00, 0x7f]).unwrap(), 127);
        assert!(matches!(decode_done_marker(&[0x41, 0x02]),
            Err(Error::ShortCapture { expected: 3, actual: 2 })));
    }

    #[test]
    fn test_decode_eeprom_offsets() {
        let offsets = decode_eeprom_offsets(&[0x41, 0x01, 0xff, 0x80, 0x00]).unwrap();
        assert_eq!(offsets, [1, -1, -128, 0]);
        assert!(matches!(decode_eeprom_offsets(&[0x41, 0x01]),
            Err(Error::ShortCapture { .. })));
    }
}
