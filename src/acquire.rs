//! The acquisition pipeline: program gains and trigger, run one or more
//! captures, average, and convert to calibrated volts.

use crate::Result;
use crate::cal::{Calibration, GainSelection};
use crate::device::Device;
use crate::proto::{CAPTURE_POINTS, ControlRegister, TriggerSource, TriggerSpec};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquireSetup {
    pub sample_rate_hz: f64,
    /// Captures to average; the mean is taken over raw counts before
    /// calibration. Zero is treated as one.
    pub averages: u32,
    pub gains: GainSelection,
    pub trigger: TriggerSpec,
}

/// A calibrated two-channel trace with a uniform sample interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub sample_interval: f64,
    pub volts_a: Vec<f64>,
    pub volts_b: Vec<f64>,
}

impl Trace {
    /// Sample times, starting at zero. The interval comes from the actual
    /// (quantized) sample rate, not the requested one.
    pub fn times(&self) -> Vec<f64> {
        (0..self.volts_a.len())
            .map(|index| index as f64 * self.sample_interval)
            .collect()
    }
}

/// Capture `averages` buffers and return the per-sample arithmetic mean of
/// each channel, still in raw counts. Internal trigger sources force
/// captures through the debug register, everything else arms the comparator
/// and waits. Zero averages is treated as one.
pub fn capture_average(device: &mut Device, register: ControlRegister,
                       source: TriggerSource, averages: u32)
        -> Result<(Vec<f64>, Vec<f64>)> {
    let averages = averages.max(1);
    let mut sum_a = vec![0.0f64; CAPTURE_POINTS];
    let mut sum_b = vec![0.0f64; CAPTURE_POINTS];
    for capture_number in 0..averages {
        log::info!("acquiring trace {} of {}", capture_number + 1, averages);
        let raw = match source {
            TriggerSource::Internal => device.capture_forced(register)?,
            _ => device.capture_triggered()?,
        };
        for (sum, &sample) in sum_a.iter_mut().zip(raw.channel_a.iter()) {
            *sum += f64::from(sample);
        }
        for (sum, &sample) in sum_b.iter_mut().zip(raw.channel_b.iter()) {
            *sum += f64::from(sample);
        }
    }
    let divisor = f64::from(averages);
    for sum in sum_a.iter_mut().chain(sum_b.iter_mut()) {
        *sum /= divisor;
    }
    Ok((sum_a, sum_b))
}

/// Run the acquisition sequence once: gain, trigger level and window,
/// control register, capture(s), averaging, calibration.
///
/// A requested sample rate that is not exactly achievable is quantized and
/// reported with a warning; it is never an error.
pub fn acquire(device: &mut Device, setup: &AcquireSetup, cal: &Calibration) -> Result<Trace> {
    device.set_gains(setup.gains)?;
    device.set_trigger_level(&setup.trigger, cal, setup.gains)?;
    device.set_post_trigger_points(&setup.trigger)?;
    let (register, actual_rate) = ControlRegister::derive(
        setup.sample_rate_hz, setup.trigger.source, setup.trigger.polarity);
    if actual_rate != setup.sample_rate_hz {
        log::warn!("requested sample rate {:.3} kHz adjusted to {:.3} kHz",
            setup.sample_rate_hz / 1000.0, actual_rate / 1000.0);
    }
    device.set_control_register(register)?;

    let (sum_a, sum_b) = capture_average(
        device, register, setup.trigger.source, setup.averages)?;
    let (volts_a, volts_b) = cal.apply(setup.gains, &sum_a, &sum_b);
    Ok(Trace { sample_interval: 1.0 / actual_rate, volts_a, volts_b })
}
