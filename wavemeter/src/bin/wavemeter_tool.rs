//! Command line tool for the reference-locked wavemeter bench.
//!
//! Subcommands:
//! - `correct`: Drift-corrected measurements of the target laser
//! - `stream`: Poll the summary endpoint, optionally recording a session file
//! - `read`: Take a single wavemeter reading
//! - `switch`: Route one channel of the fiber switch to the wavemeter
//! - `lines`: List the Cs D2 reference lines
//! - `repl`: Interactive bench control
//!
//! `--simulate` replaces the switch and the wavemeter with simulated devices.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use strum::IntoEnumIterator;
use tracing::{info, warn};
use wavemeter::bristol::{
    Bristol671, HttpTransport, Measurement, SimulatedTransport, WavelengthSource, WavelengthUnit,
};
use wavemeter::config::WavemeterConfig;
use wavemeter::correction::{CorrectionResult, FrequencyCorrector};
use wavemeter::fos::{ChannelSelector, FiberSwitch, MockDaq, MockDaqHandle, MockInventory};
use wavemeter::record::SessionRecorder;
use wavemeter::reference::CsD2Line;
use wavemeter::stream::{run_correction_loop, stream_summary, StopFlag, DEFAULT_DISPLAY_INTERVAL};
use wavemeter::telemetry::{LazyPublisher, TelemetryError, TelemetrySink};
use wavemeter::Channel;

/// Fractional calibration error of the simulated wavemeter
const SIMULATED_ERROR: f64 = 3e-7;

/// Target laser of the simulated bench (Rb D2, 780 nm)
const SIMULATED_TARGET_HZ: f64 = 384_230.484_468_5e9;

/// Reference-locked wavemeter measurements through a fiber optic switch
#[derive(Parser, Debug)]
#[command(name = "wavemeter_tool")]
#[command(about = "Reference-locked wavemeter measurements through a fiber optic switch")]
#[command(version)]
struct Args {
    /// Wavemeter address (host, host:port or base URL)
    #[arg(long, global = true)]
    address: Option<String>,

    /// JSON bench configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a simulated switch and wavemeter instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Unit the wavemeter firmware reports wavelengths in
    #[arg(long, global = true, value_enum)]
    unit: Option<WavelengthUnit>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run drift-corrected measurements of the target laser
    Correct {
        /// Switch channel of the reference laser (0-3)
        #[arg(short, long)]
        reference_channel: Option<Channel>,

        /// Switch channel of the target laser (0-3)
        #[arg(short, long)]
        target_channel: Option<Channel>,

        /// Cs D2 line the reference is locked to (e.g. "3/4", "5")
        #[arg(short = 'l', long, conflicts_with = "reference_hz")]
        reference_line: Option<CsD2Line>,

        /// Reference frequency in Hz
        #[arg(long)]
        reference_hz: Option<f64>,

        /// Settle time after each switch change in ms
        #[arg(long)]
        settle_ms: Option<u64>,

        /// Reads per phase before giving up on a signal
        #[arg(long)]
        max_tries: Option<usize>,

        /// Display cadence in ms
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Number of cycles (0 = until Ctrl-C)
        #[arg(short, long, default_value = "0")]
        count: usize,

        /// Publish results as telemetry
        #[arg(long)]
        publish: bool,
    },

    /// Poll the summary endpoint until Ctrl-C
    Stream {
        /// Directory for the session record file (no recording if omitted)
        #[arg(long)]
        record_dir: Option<PathBuf>,

        /// Channel to route to the wavemeter first
        #[arg(long)]
        channel: Option<Channel>,

        /// Delay between reads in ms
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Number of reads (0 = until Ctrl-C)
        #[arg(short, long, default_value = "0")]
        count: usize,
    },

    /// Take a single reading
    Read {
        /// Channel to route to the wavemeter first
        #[arg(long)]
        channel: Option<Channel>,

        /// Read the summary endpoint (frequency and power)
        #[arg(long)]
        summary: bool,

        /// Wavelength reads before reporting no signal
        #[arg(long, default_value = "1")]
        tries: usize,
    },

    /// Route one switch channel to the wavemeter
    Switch {
        /// Channel (0-3)
        channel: Channel,
    },

    /// List the Cs D2 reference lines
    Lines,

    /// Interactive bench REPL
    Repl,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => WavemeterConfig::load(path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => WavemeterConfig::default(),
    };
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(unit) = args.unit {
        config.wavelength_unit = unit;
    }

    match args.command {
        Command::Correct {
            reference_channel,
            target_channel,
            reference_line,
            reference_hz,
            settle_ms,
            max_tries,
            interval_ms,
            count,
            publish,
        } => {
            if let Some(channel) = reference_channel {
                config.reference_channel = channel;
            }
            if let Some(channel) = target_channel {
                config.target_channel = channel;
            }
            if let Some(line) = reference_line {
                config.reference_frequency_hz = line.frequency_hz();
            }
            if let Some(hz) = reference_hz {
                config.reference_frequency_hz = hz;
            }
            if let Some(ms) = settle_ms {
                config.settle_ms = ms;
            }
            if let Some(tries) = max_tries {
                config.max_tries = tries;
            }
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DISPLAY_INTERVAL);
            cmd_correct(config, args.simulate, interval, count, publish)
        }
        Command::Stream {
            record_dir,
            channel,
            interval_ms,
            count,
        } => cmd_stream(
            config,
            args.simulate,
            record_dir,
            channel,
            Duration::from_millis(interval_ms),
            count,
        ),
        Command::Read {
            channel,
            summary,
            tries,
        } => cmd_read(&config, args.simulate, channel, summary, tries),
        Command::Switch { channel } => cmd_switch(&config, args.simulate, channel),
        Command::Lines => {
            cmd_lines();
            Ok(())
        }
        Command::Repl => cmd_repl(&config, args.simulate),
    }
}

// ==================== Device setup ====================

/// Open the fiber switch, returning the simulated device's handle with `--simulate`.
fn open_switch(
    config: &WavemeterConfig,
    simulate: bool,
) -> Result<(Box<dyn ChannelSelector>, Option<MockDaqHandle>)> {
    if simulate {
        let daq = MockDaq::new("Simulated USB-DIO24");
        let handle = daq.handle();
        let fos = FiberSwitch::open(&MockInventory::new(vec![daq]))?;
        return Ok((Box::new(fos), Some(handle)));
    }
    Ok((open_hardware_switch(config)?, None))
}

#[cfg(all(target_os = "linux", feature = "gpio"))]
fn open_hardware_switch(config: &WavemeterConfig) -> Result<Box<dyn ChannelSelector>> {
    use wavemeter::fos::GpioInventory;

    let inventory = GpioInventory::new(config.gpio_base_line);
    Ok(Box::new(FiberSwitch::open(&inventory)?))
}

#[cfg(not(all(target_os = "linux", feature = "gpio")))]
fn open_hardware_switch(_config: &WavemeterConfig) -> Result<Box<dyn ChannelSelector>> {
    bail!("No fiber switch backend in this build (enable the `gpio` feature on Linux, or use --simulate)")
}

/// Open the wavemeter; a simulated one follows the simulated switch.
fn open_source(
    config: &WavemeterConfig,
    simulated_switch: Option<MockDaqHandle>,
) -> Box<dyn WavelengthSource> {
    let unit = config.wavelength_unit;
    match simulated_switch {
        Some(handle) => {
            info!(
                "Simulated wavemeter: reference on {}, target on {}, error {:e}",
                config.reference_channel, config.target_channel, SIMULATED_ERROR
            );
            let transport = SimulatedTransport::new(handle)
                .with_laser(
                    usize::from(config.reference_channel.index()),
                    config.reference_frequency_hz,
                )
                .with_laser(usize::from(config.target_channel.index()), SIMULATED_TARGET_HZ)
                .with_fractional_error(SIMULATED_ERROR)
                .with_unit(unit);
            Box::new(Bristol671::new(transport).with_unit(unit))
        }
        None => {
            info!("Polling wavemeter at {}", config.address);
            let transport = HttpTransport::with_timeout(&config.address, config.timeout());
            Box::new(Bristol671::new(transport).with_unit(unit))
        }
    }
}

/// Open the wavemeter, first routing `channel` to it if one is given.
///
/// The switch is handed back so it stays held while the source is in use.
fn open_routed_source(
    config: &WavemeterConfig,
    simulate: bool,
    channel: Option<Channel>,
) -> Result<(Option<Box<dyn ChannelSelector>>, Box<dyn WavelengthSource>)> {
    let Some(channel) = channel.or(simulate.then_some(config.target_channel)) else {
        return Ok((None, open_source(config, None)));
    };
    let (mut selector, simulated) = open_switch(config, simulate)?;
    selector.select(channel)?;
    std::thread::sleep(config.settle());
    Ok((Some(selector), open_source(config, simulated)))
}

fn build_corrector(
    config: &WavemeterConfig,
    simulate: bool,
) -> Result<FrequencyCorrector<Box<dyn ChannelSelector>, Box<dyn WavelengthSource>>> {
    config.validate()?;
    let (selector, simulated) = open_switch(config, simulate)?;
    let source = open_source(config, simulated);
    Ok(
        FrequencyCorrector::new(selector, source, config.reference_config())
            .with_settle(config.settle())
            .with_max_tries(config.max_tries),
    )
}

#[cfg(feature = "zmq")]
fn connect_telemetry(port: u16) -> Result<Box<dyn TelemetrySink>, TelemetryError> {
    Ok(Box::new(wavemeter::telemetry::ZmqSink::bind(port)?))
}

#[cfg(not(feature = "zmq"))]
fn connect_telemetry(_port: u16) -> Result<Box<dyn TelemetrySink>, TelemetryError> {
    warn!("Built without the `zmq` feature, writing telemetry to stderr");
    Ok(Box::new(wavemeter::telemetry::WriterSink::new(std::io::stderr())))
}

/// Run a blocking job on tokio's blocking pool, stopping it on Ctrl-C.
fn run_until_interrupted<T, F>(job: F) -> Result<T>
where
    F: FnOnce(StopFlag) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let stop = StopFlag::new();
        let mut worker = tokio::task::spawn_blocking({
            let stop = stop.clone();
            move || job(stop)
        });

        let signal = tokio::select! {
            joined = &mut worker => return joined?,
            signal = tokio::signal::ctrl_c() => signal,
        };
        match signal {
            Ok(()) => info!("Ctrl-C received, stopping after the current cycle..."),
            Err(e) => warn!("Ctrl-C handler failed ({e}), stopping"),
        }
        stop.request_stop();
        worker.await?
    })
}

// ==================== Output ====================

fn print_result(result: &CorrectionResult) {
    println!(
        "{:>17.6} GHz   measured {:>17.6} GHz   ref error {:>+10.3} MHz",
        result.corrected_frequency_hz / 1e9,
        result.measured_target_frequency_hz / 1e9,
        result.reference_error_hz / 1e6
    );
}

fn print_measurement(measurement: &Measurement) {
    if measurement.is_valid() {
        println!(
            "{:.6} GHz   power {:.4}   at {}",
            measurement.frequency_hz / 1e9,
            measurement.power,
            measurement.sample_time.format("%H:%M:%S%.3f")
        );
    } else {
        println!("No signal");
    }
}

// ==================== Commands ====================

fn cmd_correct(
    config: WavemeterConfig,
    simulate: bool,
    interval: Duration,
    count: usize,
    publish: bool,
) -> Result<()> {
    info!(
        "Reference {:.4} GHz on channel {}, target on channel {}",
        config.reference_frequency_hz / 1e9,
        config.reference_channel,
        config.target_channel
    );

    let stats = run_until_interrupted(move |stop| {
        let mut corrector = build_corrector(&config, simulate)?;
        let port = config.telemetry_port;
        let mut publisher = publish
            .then(|| LazyPublisher::new(&config.telemetry_topic, move || connect_telemetry(port)));

        let stats = run_correction_loop(
            &mut corrector,
            interval,
            &stop,
            (count > 0).then_some(count),
            |result| {
                print_result(result);
                if let Some(publisher) = publisher.as_mut() {
                    if let Err(e) = publisher.publish(result) {
                        warn!("Telemetry publish failed: {e}");
                    }
                }
            },
        );
        corrector.release();
        Ok(stats)
    })?;

    info!(
        "{} of {} cycles succeeded",
        stats.successes(),
        stats.cycles
    );
    Ok(())
}

fn cmd_stream(
    config: WavemeterConfig,
    simulate: bool,
    record_dir: Option<PathBuf>,
    channel: Option<Channel>,
    interval: Duration,
    count: usize,
) -> Result<()> {
    let recorder = record_dir
        .map(|dir| {
            SessionRecorder::create_in(&dir)
                .with_context(|| format!("Creating session file in {}", dir.display()))
        })
        .transpose()?;

    let stats = run_until_interrupted(move |stop| {
        let (_selector, mut source) = open_routed_source(&config, simulate, channel)?;
        Ok(stream_summary(
            &mut *source,
            recorder.as_ref(),
            interval,
            &stop,
            (count > 0).then_some(count),
            print_measurement,
        ))
    })?;

    info!(
        "{} of {} reads succeeded",
        stats.successes(),
        stats.cycles
    );
    Ok(())
}

fn cmd_read(
    config: &WavemeterConfig,
    simulate: bool,
    channel: Option<Channel>,
    summary: bool,
    tries: usize,
) -> Result<()> {
    let (_selector, mut source) = open_routed_source(config, simulate, channel)?;
    let measurement = if summary {
        source.read_summary()?
    } else {
        source.read_until_valid(tries)?
    };
    print_measurement(&measurement);
    Ok(())
}

fn cmd_switch(config: &WavemeterConfig, simulate: bool, channel: Channel) -> Result<()> {
    let (mut selector, _) = open_switch(config, simulate)?;
    selector.select(channel)?;
    println!("Channel {channel} selected");
    Ok(())
}

fn cmd_lines() {
    for line in CsD2Line::iter() {
        let marker = if line == CsD2Line::default() {
            "  (default)"
        } else {
            ""
        };
        println!(
            "{:>4}  {:<20} {:.4} GHz{marker}",
            line.short_name(),
            line.to_string(),
            line.frequency_ghz()
        );
    }
}

// ==================== REPL ====================

fn cmd_repl(config: &WavemeterConfig, simulate: bool) -> Result<()> {
    let mut corrector = build_corrector(config, simulate)?;

    println!("Wavemeter REPL - 'help' for commands, 'quit' to exit");
    println!();

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("wm> ") {
            Ok(line) => {
                let cmd = line.trim();
                if cmd.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(cmd);

                if cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("exit") {
                    println!("Bye!");
                    break;
                }

                if let Err(e) = repl_command(&mut corrector, config.max_tries, cmd) {
                    println!("Error: {e}");
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                break;
            }
            Err(ReadlineError::Eof) => {
                break;
            }
            Err(err) => {
                println!("Error: {err}");
                break;
            }
        }
    }

    corrector.release();
    Ok(())
}

fn print_repl_help() {
    println!("  ch <0-3>        route a channel to the wavemeter");
    println!("  read [tries]    read the wavelength endpoint until a signal is seen");
    println!("  summary         read the summary endpoint");
    println!("  correct [n]     run n correction cycles (default 1)");
    println!("  ref [line|hz]   show or set the reference frequency");
    println!("  quit            exit");
}

fn repl_command<S, W>(
    corrector: &mut FrequencyCorrector<S, W>,
    max_tries: usize,
    cmd: &str,
) -> Result<()>
where
    S: ChannelSelector,
    W: WavelengthSource,
{
    let mut parts = cmd.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next();

    match (verb.as_str(), arg) {
        ("help" | "?", _) => print_repl_help(),
        ("ch" | "switch", Some(value)) => {
            let channel: Channel = value.parse()?;
            corrector.selector_mut().select(channel)?;
            println!("OK");
        }
        ("read", tries) => {
            let tries = tries
                .map(str::parse::<usize>)
                .transpose()?
                .unwrap_or(max_tries);
            print_measurement(&corrector.source_mut().read_until_valid(tries)?);
        }
        ("summary", _) => print_measurement(&corrector.source_mut().read_summary()?),
        ("correct", n) => {
            let n = n.map(str::parse::<usize>).transpose()?.unwrap_or(1);
            for _ in 0..n {
                print_result(&corrector.correct()?);
            }
        }
        ("ref", Some(value)) => {
            let hz = parse_reference(value)?;
            corrector.set_reference_frequency(hz);
            println!("Reference {:.4} GHz", hz / 1e9);
        }
        ("ref", None) => println!(
            "Reference {:.4} GHz",
            corrector.config().reference_frequency_hz() / 1e9
        ),
        _ => bail!("Unknown command '{cmd}' (try 'help')"),
    }
    Ok(())
}

/// A Cs D2 line name or a frequency in Hz.
fn parse_reference(value: &str) -> Result<f64> {
    if let Ok(line) = value.parse::<CsD2Line>() {
        return Ok(line.frequency_hz());
    }
    value
        .parse::<f64>()
        .with_context(|| format!("'{value}' is neither a Cs D2 line nor a frequency in Hz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_waits_between_reads_by_default() {
        let args = Args::try_parse_from(["wavemeter_tool", "stream"]).unwrap();
        match args.command {
            Command::Stream { interval_ms, .. } => assert_eq!(interval_ms, 1000),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_stream_interval_override() {
        let args =
            Args::try_parse_from(["wavemeter_tool", "stream", "--interval-ms", "250"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Stream {
                interval_ms: 250,
                ..
            }
        ));
    }
}
