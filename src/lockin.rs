//! Homodyne lock-in detection and the impedance sweep arithmetic.
//!
//! A captured trace is correlated against sine and cosine references at the
//! drive frequency; the recovered vector is one discrete Fourier coefficient.
//! Precision improves with the number of complete drive cycles in the
//! 1024-sample window and is bounded by the quantized achievable sample rate.

use num_complex::Complex64;

use crate::proto::CAPTURE_POINTS;

/// In-phase and quadrature components recovered for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseVector {
    pub in_phase: f64,
    pub quadrature: f64,
}

impl PhaseVector {
    /// Peak amplitude of the component at the reference frequency.
    pub fn amplitude(&self) -> f64 {
        2.0 * (self.in_phase * self.in_phase + self.quadrature * self.quadrature).sqrt()
    }

    /// Phase relative to the sine reference, full `atan2` range.
    pub fn phase(&self) -> f64 {
        self.quadrature.atan2(self.in_phase)
    }
}

/// One point of an impedance sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpedanceSample {
    pub frequency_hz: f64,
    pub impedance: Complex64,
}

/// Correlate one channel against sine/cosine references at `frequency_hz`.
/// The channel's DC mean is removed before correlation.
pub fn sine_vectors(frequency_hz: f64, times: &[f64], volts: &[f64]) -> PhaseVector {
    assert_eq!(times.len(), volts.len());
    let count = volts.len() as f64;
    let mean = volts.iter().sum::<f64>() / count;
    let mut in_phase = 0.0;
    let mut quadrature = 0.0;
    for (&time, &volt) in times.iter().zip(volts.iter()) {
        let angle = 2.0 * std::f64::consts::PI * frequency_hz * time;
        in_phase += (volt - mean) * angle.sin();
        quadrature += (volt - mean) * angle.cos();
    }
    PhaseVector { in_phase: in_phase / count, quadrature: quadrature / count }
}

/// Complex impedance from the series reference-resistor divider.
///
/// Channel A measures the drive across the whole divider, channel B across
/// the reference resistor, so `Va/Vb = (Z + R)/R` and `Z = R*(ratio - 1)`.
/// `short_residual` is the impedance measured with the test terminals
/// shorted, subtracted to de-bias fixturing.
pub fn impedance(frequency_hz: f64, times: &[f64], volts_a: &[f64], volts_b: &[f64],
                 resistor_ohms: f64, short_residual: Complex64) -> Complex64 {
    let vector_a = sine_vectors(frequency_hz, times, volts_a);
    let vector_b = sine_vectors(frequency_hz, times, volts_b);
    let ratio = Complex64::from_polar(
        vector_a.amplitude() / vector_b.amplitude(),
        vector_a.phase() - vector_b.phase());
    resistor_ohms * (ratio - 1.0) - short_residual
}

/// Linearly spaced sweep frequencies. The first point is exactly `start`,
/// the last exactly `stop`.
pub fn sweep_list(start_hz: f64, stop_hz: f64, points: usize) -> Vec<f64> {
    (0..points)
        .map(|index| if index == 0 {
            start_hz
        } else {
            start_hz + index as f64 * (stop_hz - start_hz) / (points - 1) as f64
        })
        .collect()
}

/// Sample rate that fits `cycles` periods of the drive frequency into the
/// fixed capture window. Quantization to an achievable rate happens in the
/// acquisition pipeline.
pub fn rate_for_cycles(cycles: f64, frequency_hz: f64) -> f64 {
    CAPTURE_POINTS as f64 * frequency_hz / cycles
}
