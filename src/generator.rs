//! Waveform synthesis for the generator output: the phase increment and DAC
//! code quantization, and the 256-entry table shapes.

/// Entries in the arbitrary waveform table.
pub const WAVEFORM_TABLE_LEN: usize = 256;

/// Frequency resolution of the 32-bit phase accumulator.
pub const FREQUENCY_LSB_HZ: f64 = 0.09313225746;

/// Peak output voltage at the maximum amplitude code.
pub const AMPLITUDE_FULL_SCALE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
}

impl Waveform {
    /// One period of the waveform as 8-bit DAC codes, mid-scale centered.
    pub fn table(self) -> [u8; WAVEFORM_TABLE_LEN] {
        let mut table = [0u8; WAVEFORM_TABLE_LEN];
        match self {
            Waveform::Sine => {
                for (index, entry) in table.iter_mut().enumerate() {
                    let phase = 2.0 * std::f64::consts::PI
                        * index as f64 / WAVEFORM_TABLE_LEN as f64;
                    *entry = (127.5 + 127.5 * phase.sin()).round() as u8;
                }
            }
            Waveform::Square => {
                for (index, entry) in table.iter_mut().enumerate() {
                    *entry = if index < WAVEFORM_TABLE_LEN / 2 { 255 } else { 0 };
                }
            }
        }
        table
    }
}

impl std::str::FromStr for Waveform {
    type Err = String;

    fn from_str(name: &str) -> core::result::Result<Waveform, String> {
        match name {
            "sine" => Ok(Waveform::Sine),
            "square" => Ok(Waveform::Square),
            _ => Err(format!("unknown waveform {:?} (expected sine or square)", name)),
        }
    }
}

/// Quantize a frequency to the 32-bit phase increment word. Returns the word
/// and the actual output frequency.
pub(crate) fn frequency_word(frequency_hz: f64) -> (u32, f64) {
    let word = (frequency_hz / FREQUENCY_LSB_HZ).round().max(0.0).min(u32::MAX as f64) as u32;
    (word, word as f64 * FREQUENCY_LSB_HZ)
}

/// Quantize a peak amplitude to the 8-bit DAC code, clamped to full scale.
/// Returns the code and the actual amplitude.
pub(crate) fn amplitude_code(volts_peak: f64) -> (u8, f64) {
    let clamped = volts_peak.clamp(0.0, AMPLITUDE_FULL_SCALE);
    let code = (clamped / AMPLITUDE_FULL_SCALE * 255.0).round() as u8;
    (code, code as f64 * AMPLITUDE_FULL_SCALE / 255.0)
}
