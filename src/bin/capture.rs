use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;

use cgr101::{acquire, AcquireSetup, Calibration, Config, Device, Trace};

#[derive(Debug, Parser)]
#[command(name = "cgr-capture",
          about = "Capture one (possibly averaged) buffer from the CGR-101 and write it as CSV")]
struct Args {
    /// Runtime configuration file
    #[arg(short = 'r', long, default_value = "cgr-capture.toml")]
    rcfile: PathBuf,
    /// Output CSV file
    #[arg(short, long, default_value = "capture.csv")]
    output: PathBuf,
}

fn write_csv(path: &Path, trace: &Trace) -> cgr101::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "time,channel_a,channel_b")?;
    let times = trace.times();
    for index in 0..trace.volts_a.len() {
        writeln!(file, "{:.9},{:.6},{:.6}",
            times[index], trace.volts_a[index], trace.volts_b[index])?;
    }
    Ok(())
}

fn main() -> cgr101::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::load_or_init(&args.rcfile)?;
    let calibration = Calibration::load(Path::new(&config.calibration.file))?;
    let mut device = Device::scan(Some(&config.connection.port))?;
    let setup = AcquireSetup {
        sample_rate_hz: config.acquire.rate,
        averages: config.acquire.averages,
        gains: config.gains(),
        trigger: config.trigger_spec()?,
    };
    let trace = acquire(&mut device, &setup, &calibration)?;
    write_csv(&args.output, &trace)?;
    log::info!("wrote {} samples per channel to {}",
        trace.volts_a.len(), args.output.display());
    Ok(())
}
