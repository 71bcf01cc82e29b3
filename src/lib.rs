mod port;
mod proto;
mod cal;
mod config;
mod device;
mod acquire;
mod lockin;
mod generator;

#[derive(Debug)]
pub enum Error {
    NotFound,
    Serial(serialport::Error),
    Io(std::io::Error),
    ShortCapture { expected: usize, actual: usize },
    CaptureTimeout,
    TriggerLevelOutOfRange { counts: i32 },
    PostTriggerTooLarge { points: u32 },
    Config(String),
    Calibration(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::NotFound =>
                write!(f, "no CGR-101 found on any serial port"),
            Self::Serial(serial_error) =>
                write!(f, "serial port error: {}", serial_error),
            Self::Io(io_error) =>
                write!(f, "I/O error: {}", io_error),
            Self::ShortCapture { expected, actual } =>
                write!(f, "short capture: expected {} bytes, got {}", expected, actual),
            Self::CaptureTimeout =>
                write!(f, "timed out waiting for trigger"),
            Self::TriggerLevelOutOfRange { counts } =>
                write!(f, "trigger level of {} counts is outside 0..=1023", counts),
            Self::PostTriggerTooLarge { points } =>
                write!(f, "post-trigger window of {} points is outside 0..=1024", points),
            Self::Config(message) =>
                write!(f, "configuration error: {}", message),
            Self::Calibration(message) =>
                write!(f, "calibration error: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serial(ref serial_error) => Some(serial_error),
            Self::Io(ref io_error) => Some(io_error),
            _ => None
        }
    }
}

impl From<serialport::Error> for Error {
    fn from(error: serialport::Error) -> Self {
        Error::Serial(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use port::Port;

pub use proto::{
    Channel,
    ProbeGain,
    TriggerSource,
    TriggerPolarity,
    TriggerSpec,
    ControlFlags,
    ControlRegister,
    RawCapture,
    CAPTURE_POINTS,
    BASE_SAMPLE_RATE,
    sample_rate_bits,
    trigger_level_counts,
    decode_capture,
};

pub use cal::{
    Calibration,
    ChannelCalibration,
    GainSelection,
};

pub use config::Config;

pub use device::Device;

pub use acquire::{
    AcquireSetup,
    Trace,
    acquire,
    capture_average,
};

pub use lockin::{
    PhaseVector,
    ImpedanceSample,
    sine_vectors,
    impedance,
    sweep_list,
    rate_for_cycles,
};

pub use generator::{
    Waveform,
    WAVEFORM_TABLE_LEN,
    FREQUENCY_LSB_HZ,
    AMPLITUDE_FULL_SCALE,
};
