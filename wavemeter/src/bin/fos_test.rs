//! Test binary for the fiber optic switch.
//!
//! Opens the first DAQ device, steps through all four switch channels and
//! releases the device. With `--simulate` a mock DAQ is used and the port
//! writes are printed afterwards.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use strum::IntoEnumIterator;
use tracing::info;
use wavemeter::fos::{ChannelSelector, FiberSwitch, MockDaq, MockInventory};
use wavemeter::Channel;

#[derive(Parser, Debug)]
#[command(name = "fos_test")]
#[command(about = "Cycle the fiber optic switch through its channels")]
struct Args {
    /// Dwell time on each channel in ms
    #[arg(long, default_value = "500")]
    dwell_ms: u64,

    /// Number of passes over the four channels
    #[arg(short, long, default_value = "1")]
    passes: usize,

    /// First of the two GPIO lines driving the switch
    #[arg(long, default_value = "0")]
    gpio_base_line: u32,

    /// Use a mock DAQ instead of hardware
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let dwell = Duration::from_millis(args.dwell_ms);

    if args.simulate {
        let daq = MockDaq::new("Simulated USB-DIO24");
        let handle = daq.handle();
        let mut fos = FiberSwitch::open(&MockInventory::new(vec![daq]))?;
        cycle(&mut fos, args.passes, dwell)?;
        fos.release()?;
        info!("Port writes: {:?}", handle.writes());
        return Ok(());
    }

    run_hardware(&args, dwell)
}

#[cfg(all(target_os = "linux", feature = "gpio"))]
fn run_hardware(args: &Args, dwell: Duration) -> Result<()> {
    use wavemeter::fos::GpioInventory;

    let mut fos = FiberSwitch::open(&GpioInventory::new(args.gpio_base_line))?;
    info!(
        "Opened {} port {} ({} bits)",
        fos.descriptor().product_name,
        fos.port().name,
        fos.port().num_bits
    );
    cycle(&mut fos, args.passes, dwell)?;
    fos.release()?;
    Ok(())
}

#[cfg(not(all(target_os = "linux", feature = "gpio")))]
fn run_hardware(_args: &Args, _dwell: Duration) -> Result<()> {
    anyhow::bail!("No fiber switch backend in this build (enable the `gpio` feature on Linux, or use --simulate)")
}

fn cycle<S: ChannelSelector>(fos: &mut S, passes: usize, dwell: Duration) -> Result<()> {
    for pass in 1..=passes {
        info!("Pass {pass}/{passes}");
        for channel in Channel::iter() {
            fos.select(channel)?;
            info!("  channel {channel} (bits {:02b})", channel.bits());
            std::thread::sleep(dwell);
        }
    }
    fos.select(Channel::Ch0)?;
    info!("Switch left on channel 0");
    Ok(())
}
