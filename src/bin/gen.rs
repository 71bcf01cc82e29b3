use std::path::PathBuf;

use clap::Parser;

use cgr101::{Config, Device, Waveform};

#[derive(Debug, Parser)]
#[command(name = "cgr-gen",
          about = "Drive the CGR-101 waveform generator output")]
struct Args {
    /// Runtime configuration file
    #[arg(short = 'r', long, default_value = "cgr-gen.toml")]
    rcfile: PathBuf,
    /// Waveform shape, overriding the configuration file
    #[arg(long)]
    waveform: Option<Waveform>,
    /// Frequency in Hz, overriding the configuration file
    #[arg(long)]
    frequency: Option<f64>,
    /// Amplitude in peak volts, overriding the configuration file
    #[arg(long)]
    amplitude: Option<f64>,
    /// Turn the output off and exit
    #[arg(long)]
    off: bool,
}

fn main() -> cgr101::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::load_or_init(&args.rcfile)?;
    let mut device = Device::scan(Some(&config.connection.port))?;

    if args.off {
        device.set_output_amplitude(0.0)?;
        log::info!("output amplitude set to zero");
        return Ok(());
    }

    let waveform = match args.waveform {
        Some(waveform) => waveform,
        None => config.generator.waveform.parse().map_err(cgr101::Error::Config)?,
    };
    let frequency = args.frequency.unwrap_or(config.generator.frequency);
    let amplitude = args.amplitude.unwrap_or(config.generator.amplitude);

    device.program_waveform(waveform)?;
    let actual_frequency = device.set_sine_frequency(frequency)?;
    let actual_amplitude = device.set_output_amplitude(amplitude)?;
    log::info!("generating a {:?} wave at {:.2} Hz, {:.2} Vp",
        waveform, actual_frequency, actual_amplitude);
    Ok(())
}
