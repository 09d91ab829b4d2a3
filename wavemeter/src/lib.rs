//! Reference-locked frequency correction for a Bristol 671 wavemeter.
//!
//! A fiber optic switch (driven by two digital output lines) routes one of
//! four lasers to the wavemeter. Each correction cycle measures a reference
//! laser locked to a known transition, then the target laser, and removes the
//! wavemeter's drift from the target reading using the reference's error.
//!
//! ```no_run
//! use std::time::Duration;
//! use wavemeter::bristol::Bristol671;
//! use wavemeter::correction::{FrequencyCorrector, ReferenceConfig};
//! use wavemeter::fos::{FiberSwitch, MockDaq, MockInventory};
//! use wavemeter::reference::CsD2Line;
//! use wavemeter::Channel;
//!
//! # fn main() -> anyhow::Result<()> {
//! let fos = FiberSwitch::open(&MockInventory::new(vec![MockDaq::new("bench")]))?;
//! let wm = Bristol671::connect("192.168.0.109");
//! let config = ReferenceConfig::new(Channel::Ch0, Channel::Ch1, CsD2Line::default().frequency_hz());
//! let mut corrector = FrequencyCorrector::new(fos, wm, config).with_settle(Duration::from_millis(250));
//! let result = corrector.correct()?;
//! println!("{:.4} GHz", result.corrected_frequency_hz / 1e9);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! ## Individual Drivers
//! - `gpio` - Fiber switch on Linux GPIO character devices
//! - `zmq` - ZeroMQ telemetry publisher
//!
//! ## Convenience Features
//! - `full-linux` - All drivers for Linux deployments
//!
//! Without any features the crate builds the HTTP wavemeter driver, the mock
//! switch backend and the simulated wavemeter, which is enough to run the
//! whole pipeline on a laptop.

pub mod bristol;
pub mod channel;
pub mod config;
pub mod correction;
pub mod fos;
pub mod record;
pub mod reference;
pub mod stream;
pub mod telemetry;

pub use channel::Channel;
