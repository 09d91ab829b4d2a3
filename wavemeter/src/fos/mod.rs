//! Fiber Optic Switch (FOS) driver
//!
//! The Bristol fiber optic switch routes one of four optical inputs to the
//! wavemeter. It has no protocol of its own: the active input is selected by
//! the logic levels on two digital lines, driven here from the first digital
//! output port of a DAQ device.
//!
//! # Device Model
//!
//! The DAQ side is reached through two small traits so the switch logic can be
//! exercised without hardware:
//!
//! - [`DaqInventory`] enumerates attached devices and opens one
//! - [`DaqDevice`] exposes connect/disconnect, the digital port layout,
//!   direction configuration and raw port writes
//!
//! [`FiberSwitch::open`] always uses the first device the inventory reports.
//!
//! # Example
//!
//! ```no_run
//! use wavemeter::fos::{ChannelSelector, FiberSwitch, MockInventory};
//! use wavemeter::Channel;
//!
//! let mut fos = FiberSwitch::open(&MockInventory::single("USB-DIO24/37"))?;
//! fos.select(Channel::Ch1)?;
//! fos.release()?;
//! # Ok::<(), wavemeter::fos::ChannelError>(())
//! ```

#[cfg(all(target_os = "linux", feature = "gpio"))]
mod gpio;
mod mock;

#[cfg(all(target_os = "linux", feature = "gpio"))]
pub use gpio::{GpioDaq, GpioInventory, DEFAULT_GPIO_CONSUMER};
pub use mock::{DaqEvent, MockDaq, MockDaqHandle, MockInventory};

use thiserror::Error;
use tracing::{debug, info};

use crate::channel::Channel;

/// Number of port bits needed to address all four switch inputs.
pub const SWITCH_BITS: u8 = 2;

/// Errors raised by the fiber optic switch and its DAQ backends.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The inventory reported no DAQ devices.
    #[error("No DAQ devices found")]
    DeviceUnavailable,

    /// The first device has no usable digital output port.
    #[error("Device {0} does not support digital output")]
    UnsupportedDevice(String),

    /// Channel number outside `0..=3`.
    #[error("Invalid channel {0} (expected 0, 1, 2 or 3)")]
    InvalidChannel(i64),

    /// Text that is not a channel number at all.
    #[error("Cannot parse channel from {0:?}")]
    Parse(String),

    /// Backend failure while talking to the DAQ device.
    #[error("DAQ device error: {0}")]
    Device(String),

    /// The switch handle was already released.
    #[error("Fiber switch already released")]
    Released,
}

/// Result type for switch operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Interface for optical input selection.
///
/// Abstracts the switch hardware so the correction cycle can be tested
/// against a recording double.
pub trait ChannelSelector {
    /// Route `channel` to the wavemeter.
    fn select(&mut self, channel: Channel) -> ChannelResult<()>;

    /// Release the underlying device. Calling this more than once is a no-op.
    fn release(&mut self) -> ChannelResult<()> {
        Ok(())
    }
}

impl<S: ChannelSelector + ?Sized> ChannelSelector for Box<S> {
    fn select(&mut self, channel: Channel) -> ChannelResult<()> {
        (**self).select(channel)
    }

    fn release(&mut self) -> ChannelResult<()> {
        (**self).release()
    }
}

/// Identification of an enumerated DAQ device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaqDescriptor {
    pub product_name: String,
    pub unique_id: String,
    pub dev_string: String,
}

/// How a digital port's direction is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortIoType {
    /// Direction is set for the whole port at once.
    Io,
    /// Each bit has its own direction.
    BitIo,
}

/// Signal direction for a port or bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Layout of one digital port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub id: u32,
    pub name: String,
    pub io_type: PortIoType,
    pub num_bits: u8,
}

/// Enumerates and opens DAQ devices.
pub trait DaqInventory {
    type Device: DaqDevice;

    /// List attached devices in discovery order.
    fn list_devices(&self) -> ChannelResult<Vec<DaqDescriptor>>;

    /// Create a handle for `descriptor` (not yet connected).
    fn open(&self, descriptor: &DaqDescriptor) -> ChannelResult<Self::Device>;
}

/// Low-level digital I/O device.
pub trait DaqDevice {
    fn connect(&mut self) -> ChannelResult<()>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self) -> ChannelResult<()>;

    /// Free the device handle. Must be called after [`disconnect`](Self::disconnect).
    fn release(&mut self);

    /// Digital ports, or `None` if the device has no digital I/O subsystem.
    fn dio_ports(&self) -> Option<Vec<PortInfo>>;

    fn config_port(&mut self, port: u32, direction: Direction) -> ChannelResult<()>;

    fn config_bit(&mut self, port: u32, bit: u8, direction: Direction) -> ChannelResult<()>;

    /// Write `value` as the raw bit pattern of `port`.
    fn write_port(&mut self, port: u32, value: u8) -> ChannelResult<()>;
}

/// Fiber optic switch driven from the first digital port of a DAQ device.
///
/// Owns the device handle for its whole lifetime. The handle is released by
/// [`release`](ChannelSelector::release) or when the switch is dropped.
pub struct FiberSwitch<D: DaqDevice> {
    device: Option<D>,
    descriptor: DaqDescriptor,
    port: PortInfo,
}

impl<D: DaqDevice> FiberSwitch<D> {
    /// Open the first device reported by `inventory` and configure its first
    /// digital port for output.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::DeviceUnavailable`] if no device is attached
    /// - [`ChannelError::UnsupportedDevice`] if the device has no digital port
    ///   wide enough to drive the switch
    pub fn open<I>(inventory: &I) -> ChannelResult<Self>
    where
        I: DaqInventory<Device = D>,
    {
        let devices = inventory.list_devices()?;
        if devices.is_empty() {
            return Err(ChannelError::DeviceUnavailable);
        }

        info!("Found {} DAQ device(s):", devices.len());
        for d in &devices {
            info!("  {} ({})", d.product_name, d.unique_id);
        }

        let descriptor = devices[0].clone();
        let mut device = inventory.open(&descriptor)?;
        info!("Connecting to {} - please wait...", descriptor.dev_string);
        let configured = device
            .connect()
            .and_then(|()| Self::configure_output(&mut device, &descriptor));

        match configured {
            Ok(port) => {
                info!(
                    "Active DAQ device: {} ({}), port {}",
                    descriptor.dev_string, descriptor.unique_id, port.name
                );
                Ok(Self {
                    device: Some(device),
                    descriptor,
                    port,
                })
            }
            Err(e) => {
                shutdown(&mut device);
                Err(e)
            }
        }
    }

    /// Pick the first digital port and set it to output.
    fn configure_output(device: &mut D, descriptor: &DaqDescriptor) -> ChannelResult<PortInfo> {
        let port = device
            .dio_ports()
            .and_then(|ports| ports.into_iter().next())
            .ok_or_else(|| ChannelError::UnsupportedDevice(descriptor.product_name.clone()))?;

        if port.num_bits < SWITCH_BITS {
            return Err(ChannelError::UnsupportedDevice(format!(
                "{} (port {} has {} bit(s))",
                descriptor.product_name, port.name, port.num_bits
            )));
        }

        debug!("Configuring port {} ({:?}) for output", port.name, port.io_type);
        match port.io_type {
            PortIoType::BitIo => {
                for bit in 0..port.num_bits {
                    device.config_bit(port.id, bit, Direction::Output)?;
                }
            }
            PortIoType::Io => device.config_port(port.id, Direction::Output)?,
        }
        Ok(port)
    }

    /// Select a channel from an unchecked integer.
    ///
    /// Values outside `0..=3` fail with [`ChannelError::InvalidChannel`]
    /// without touching the device.
    pub fn change_channel(&mut self, raw: i64) -> ChannelResult<()> {
        let channel = Channel::try_from(raw)?;
        self.select(channel)
    }

    /// Device the switch is bound to.
    pub fn descriptor(&self) -> &DaqDescriptor {
        &self.descriptor
    }

    /// Port driving the switch lines.
    pub fn port(&self) -> &PortInfo {
        &self.port
    }

    pub fn is_released(&self) -> bool {
        self.device.is_none()
    }
}

impl<D: DaqDevice> ChannelSelector for FiberSwitch<D> {
    fn select(&mut self, channel: Channel) -> ChannelResult<()> {
        let device = self.device.as_mut().ok_or(ChannelError::Released)?;
        debug!("FOS select channel {}", channel);
        device.write_port(self.port.id, channel.bits())
    }

    fn release(&mut self) -> ChannelResult<()> {
        if let Some(mut device) = self.device.take() {
            shutdown(&mut device);
            info!("Released DAQ device {}", self.descriptor.dev_string);
        }
        Ok(())
    }
}

impl<D: DaqDevice> Drop for FiberSwitch<D> {
    fn drop(&mut self) {
        let _ = ChannelSelector::release(self);
    }
}

/// Disconnect (if connected) and release a device handle.
fn shutdown<D: DaqDevice>(device: &mut D) {
    if device.is_connected() {
        if let Err(e) = device.disconnect() {
            debug!("Disconnect failed during release: {e}");
        }
    }
    device.release();
}
