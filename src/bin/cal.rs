use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use time::OffsetDateTime;

use cgr101::{
    acquire, capture_average, AcquireSetup, Calibration, Channel, Config,
    ControlRegister, Device, TriggerPolarity, TriggerSource, TriggerSpec,
};

#[derive(Debug, Parser)]
#[command(name = "cgr-cal",
          about = "Measure offset (and optionally slope) calibration constants")]
struct Args {
    /// Runtime configuration file
    #[arg(short = 'r', long, default_value = "cgr-cal.toml")]
    rcfile: PathBuf,
    /// Known source voltage for the slope step; offsets only when absent
    #[arg(long)]
    slope_voltage: Option<f64>,
}

fn prompt(message: &str) -> cgr101::Result<()> {
    print!("* {}, then press return...", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn main() -> cgr101::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::load_or_init(&args.rcfile)?;
    let calfile = config.calibration.file.clone();
    let mut calibration = Calibration::load(Path::new(&calfile))?;
    let mut device = Device::scan(Some(&config.connection.port))?;

    // calibration always runs with forced captures
    let trigger = TriggerSpec::new(TriggerSource::Internal, 0.0,
        TriggerPolarity::Rising, 0)?;
    let gains = config.gains();
    device.set_gains(gains)?;
    device.set_trigger_level(&trigger, &calibration, gains)?;
    device.set_post_trigger_points(&trigger)?;
    let (register, actual_rate) = ControlRegister::derive(
        config.acquire.rate, trigger.source, trigger.polarity);
    if actual_rate != config.acquire.rate {
        log::warn!("requested sample rate {:.3} kHz adjusted to {:.3} kHz",
            config.acquire.rate / 1000.0, actual_rate / 1000.0);
    }
    device.set_control_register(register)?;

    // offsets: with the inputs open, mid-scale should read back exactly 511
    prompt("Remove all inputs")?;
    let (raw_a, raw_b) = capture_average(
        &mut device, register, TriggerSource::Internal, config.acquire.averages)?;
    let now = OffsetDateTime::now_utc();
    for (channel, raw) in [(Channel::A, &raw_a), (Channel::B, &raw_b)] {
        let offset = 511.0 - mean(raw);
        log::info!("channel {:?} offset set to {:.3} counts", channel, offset);
        let constants = calibration.constants_mut(channel, gains.for_channel(channel));
        constants.offset = offset;
        constants.offset_caldate = Some(now);
    }

    // slopes: offset-corrected counts against a known source voltage
    if let Some(slope_voltage) = args.slope_voltage {
        prompt(&format!("Connect the {:.3} V calibration source to both inputs",
            slope_voltage))?;
        let (raw_a, raw_b) = capture_average(
            &mut device, register, TriggerSource::Internal, config.acquire.averages)?;
        let now = OffsetDateTime::now_utc();
        for (channel, raw) in [(Channel::A, &raw_a), (Channel::B, &raw_b)] {
            let corrected = calibration.offset_correct(gains, channel, raw);
            let slope = slope_voltage / mean(&corrected);
            log::info!("channel {:?} slope set to {:.6} V/count", channel, slope);
            let constants = calibration.constants_mut(channel, gains.for_channel(channel));
            constants.slope = slope;
            constants.slope_caldate = Some(now);
        }
    }

    // sanity capture with the new constants
    prompt("Ready to test the calibration")?;
    let setup = AcquireSetup {
        sample_rate_hz: config.acquire.rate,
        averages: config.acquire.averages,
        gains,
        trigger,
    };
    let trace = acquire(&mut device, &setup, &calibration)?;
    for (channel, volts) in [(Channel::A, &trace.volts_a), (Channel::B, &trace.volts_b)] {
        let low = volts.iter().cloned().fold(f64::INFINITY, f64::min);
        let high = volts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        log::info!("channel {:?}: mean {:.4} V, {:.4} V peak to peak",
            channel, mean(volts), high - low);
    }

    calibration.save(Path::new(&calfile))?;
    Ok(())
}
