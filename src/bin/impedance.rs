use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use num_complex::Complex64;

use cgr101::{
    acquire, impedance, rate_for_cycles, sine_vectors, sweep_list,
    AcquireSetup, Calibration, Config, Device, ImpedanceSample,
    TriggerPolarity, TriggerSource, TriggerSpec,
};

#[derive(Debug, Parser)]
#[command(name = "cgr-imp",
          about = "Measure impedance across a frequency sweep with a homodyne lock-in")]
struct Args {
    /// Runtime configuration file
    #[arg(short = 'r', long, default_value = "cgr-imp.toml")]
    rcfile: PathBuf,
    /// Output CSV file
    #[arg(short, long, default_value = "impedance.csv")]
    output: PathBuf,
}

fn write_csv(path: &Path, samples: &[ImpedanceSample]) -> cgr101::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "frequency,z_real,z_imag,z_mag,z_phase_deg")?;
    for sample in samples {
        writeln!(file, "{:.3},{:.4},{:.4},{:.4},{:.3}",
            sample.frequency_hz,
            sample.impedance.re, sample.impedance.im,
            sample.impedance.norm(), sample.impedance.arg().to_degrees())?;
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

    // The sweep triggers on the driven channel: rising edge through 0.05 V,
    // half the window after the trigger.
    let trigger = TriggerSpec::new(TriggerSource::ChannelA, 0.05,
        TriggerPolarity::Rising, 512)?;
    let gains = config.gains();
    let short_residual = Complex64::new(
        config.impedance.rshort_real, config.impedance.rshort_imag);

    let mut samples = Vec::with_capacity(config.sweep.points);
    for (step, &requested) in sweep_list(
            config.sweep.start, config.sweep.stop, config.sweep.points).iter().enumerate() {
        let frequency = device.set_sine_frequency(requested)?;
        log::debug!("requested {:.2} Hz, set {:.2} Hz", requested, frequency);
        if step == 0 {
            let amplitude = device.set_output_amplitude(config.sweep.amplitude)?;
            log::debug!("requested {:.2} Vp, set {:.2} Vp",
                config.sweep.amplitude, amplitude);
        }
        let setup = AcquireSetup {
            sample_rate_hz: rate_for_cycles(config.sweep.cycles, frequency),
            averages: config.acquire.averages,
            gains,
            trigger,
        };
        let trace = acquire(&mut device, &setup, &calibration)?;
        let times = trace.times();

        let vector_a = sine_vectors(frequency, &times, &trace.volts_a);
        let vector_b = sine_vectors(frequency, &times, &trace.volts_b);
        log::debug!("channel A: {:.3} Vp at {:.3} degrees",
            vector_a.amplitude(), vector_a.phase().to_degrees());
        log::debug!("channel B: {:.3} Vp at {:.3} degrees",
            vector_b.amplitude(), vector_b.phase().to_degrees());

        let z = impedance(frequency, &times, &trace.volts_a, &trace.volts_b,
            config.impedance.resistor, short_residual);
        log::info!("{:.1} Hz: |Z| = {:.3} ohm, angle {:.3} degrees",
            frequency, z.norm(), z.arg().to_degrees());
        samples.push(ImpedanceSample { frequency_hz: frequency, impedance: z });
    }

    // quiet the output stage before leaving
    device.set_output_amplitude(0.0)?;

    write_csv(&args.output, &samples)?;
    log::info!("wrote {} sweep points to {}", samples.len(), args.output.display());
    Ok(())
}
