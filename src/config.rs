//! Runtime configuration shared by the command line tools: a human-editable
//! TOML file, generated with documented defaults when missing.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use crate::cal::GainSelection;
use crate::proto::{ProbeGain, TriggerPolarity, TriggerSource, TriggerSpec};

/// Written verbatim when no configuration file exists. Kept in sync with the
/// `Default` impls below (checked by a test).
const DEFAULT_CONFIG: &str = "\
# Configuration file for the cgr101 tools.

[connection]
# The port tried first. On failure the software scans every detected serial
# port, then a few legacy candidates.
port = \"/dev/ttyUSB0\"

[calibration]
# Calibration constants, JSON. The previous version is kept alongside with
# an _old suffix whenever this file is rewritten.
file = \"cgrcal.json\"

[inputs]
# Probe setting per channel: \"1x\" or \"10x\". The unit measures +/-25 Vpp at
# its inputs with a 1x probe, and at the tip of a 10x probe with 10x.
probe_a = \"1x\"
probe_b = \"1x\"

[acquire]
# Sample rate in Hz. Achievable rates are 20 MHz / 2^N for N in 0..=15
# (610.35 Hz up to 20 Msps); requests are quantized to the nearest one.
# The analog bandwidth is a fixed 2 MHz regardless of rate.
rate = 100000.0
# Number of captures to average.
averages = 1

[trigger]
# Trigger source: \"a\", \"b\", \"external\", or \"internal\" (captures are forced
# immediately, regardless of any level).
source = \"internal\"
# Trigger level in volts.
level = 1.025
# Trigger slope: \"rising\" or \"falling\".
polarity = \"rising\"
# Samples to keep after the trigger, 0..=1024. The unit always records 1024
# samples per channel; the remainder land before the trigger.
points = 512

[sweep]
# Impedance sweep: start and stop frequencies in Hz, number of points,
# drive cycles to fit in each capture, and drive amplitude in peak volts.
start = 100.0
stop = 1000.0
points = 10
cycles = 10.0
amplitude = 0.1

[impedance]
# Reference resistor in ohms; current is the channel B voltage over this.
resistor = 100.0
# Residual measured with the test terminals shorted, subtracted from every
# sweep point.
rshort_real = 0.0
rshort_imag = 0.0

[generator]
# Waveform (\"sine\" or \"square\"), frequency in Hz, amplitude in peak volts.
waveform = \"sine\"
frequency = 1000.0
amplitude = 0.5
";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub port: String,
}

impl Default for Connection {
    fn default() -> Self {
        Connection { port: "/dev/ttyUSB0".to_owned() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationFile {
    pub file: String,
}

impl Default for CalibrationFile {
    fn default() -> Self {
        CalibrationFile { file: "cgrcal.json".to_owned() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inputs {
    pub probe_a: ProbeGain,
    pub probe_b: ProbeGain,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Acquire {
    pub rate: f64,
    pub averages: u32,
}

impl Default for Acquire {
    fn default() -> Self {
        Acquire { rate: 100e3, averages: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trigger {
    pub source: TriggerSource,
    pub level: f64,
    pub polarity: TriggerPolarity,
    pub points: u32,
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger {
            source: TriggerSource::Internal,
            level: 1.025,
            polarity: TriggerPolarity::Rising,
            points: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sweep {
    pub start: f64,
    pub stop: f64,
    pub points: usize,
    pub cycles: f64,
    pub amplitude: f64,
}

impl Default for Sweep {
    fn default() -> Self {
        Sweep { start: 100.0, stop: 1000.0, points: 10, cycles: 10.0, amplitude: 0.1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Impedance {
    pub resistor: f64,
    pub rshort_real: f64,
    pub rshort_imag: f64,
}

impl Default for Impedance {
    fn default() -> Self {
        Impedance { resistor: 100.0, rshort_real: 0.0, rshort_imag: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Generator {
    pub waveform: String,
    pub frequency: f64,
    pub amplitude: f64,
}

impl Default for Generator {
    fn default() -> Self {
        Generator { waveform: "sine".to_owned(), frequency: 1000.0, amplitude: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: Connection,
    pub calibration: CalibrationFile,
    pub inputs: Inputs,
    pub acquire: Acquire,
    pub trigger: Trigger,
    pub sweep: Sweep,
    pub impedance: Impedance,
    pub generator: Generator,
}

impl Config {
    /// Load the configuration file, generating the documented default file
    /// first if none exists.
    pub fn load_or_init(path: &Path) -> Result<Config> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("configuration file {} not found, writing defaults",
                    path.display());
                fs::write(path, DEFAULT_CONFIG)?;
                DEFAULT_CONFIG.to_owned()
            }
            Err(error) => return Err(error.into()),
        };
        toml::from_str(&contents).map_err(|error|
            Error::Config(format!("could not parse {}: {}", path.display(), error)))
    }

    pub fn gains(&self) -> GainSelection {
        GainSelection { channel_a: self.inputs.probe_a, channel_b: self.inputs.probe_b }
    }

    pub fn trigger_spec(&self) -> Result<TriggerSpec> {
        TriggerSpec::new(self.trigger.source, self.trigger.level,
            self.trigger.polarity, self.trigger.points)
    }
}
