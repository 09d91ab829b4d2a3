//! Linux GPIO character-device backend for the fiber switch.
//!
//! Drives the two switch select lines from consecutive offsets of the first
//! gpiochip found under `/dev`. Line `base` carries bit 0 and `base + 1`
//! carries bit 1 of the channel number.

use std::path::PathBuf;

use gpiod::{Chip, Lines, Options, Output};
use tracing::debug;

use super::{
    ChannelError, ChannelResult, DaqDescriptor, DaqDevice, DaqInventory, Direction, PortInfo,
    PortIoType, SWITCH_BITS,
};

/// Consumer label shown by `gpioinfo` for the requested lines.
pub const DEFAULT_GPIO_CONSUMER: &str = "fiber-switch";

/// Inventory of gpiochips on this machine.
#[derive(Debug, Clone)]
pub struct GpioInventory {
    base_line: u32,
    consumer: String,
}

impl GpioInventory {
    /// Use lines `base_line` and `base_line + 1` of the first chip.
    pub fn new(base_line: u32) -> Self {
        Self {
            base_line,
            consumer: DEFAULT_GPIO_CONSUMER.to_string(),
        }
    }

    pub fn with_consumer(mut self, consumer: &str) -> Self {
        self.consumer = consumer.to_string();
        self
    }
}

impl DaqInventory for GpioInventory {
    type Device = GpioDaq;

    fn list_devices(&self) -> ChannelResult<Vec<DaqDescriptor>> {
        let mut paths = Chip::list_devices()
            .map_err(|e| ChannelError::Device(format!("Failed to list GPIO chips: {e}")))?;
        paths.sort();
        Ok(paths
            .into_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                DaqDescriptor {
                    product_name: name.clone(),
                    unique_id: path.display().to_string(),
                    dev_string: name,
                }
            })
            .collect())
    }

    fn open(&self, descriptor: &DaqDescriptor) -> ChannelResult<GpioDaq> {
        Ok(GpioDaq {
            path: PathBuf::from(&descriptor.unique_id),
            base_line: self.base_line,
            consumer: self.consumer.clone(),
            chip: None,
            lines: None,
        })
    }
}

/// One gpiochip used as a two-bit output port.
pub struct GpioDaq {
    path: PathBuf,
    base_line: u32,
    consumer: String,
    chip: Option<Chip>,
    lines: Option<Lines<Output>>,
}

impl DaqDevice for GpioDaq {
    fn connect(&mut self) -> ChannelResult<()> {
        let chip = Chip::new(&self.path).map_err(|e| {
            ChannelError::Device(format!(
                "Failed to open GPIO chip '{}': {e}",
                self.path.display()
            ))
        })?;
        debug!(
            "Opened {} ({}), {} lines",
            chip.name(),
            chip.label(),
            chip.num_lines()
        );
        self.chip = Some(chip);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.chip.is_some()
    }

    fn disconnect(&mut self) -> ChannelResult<()> {
        self.lines = None;
        self.chip = None;
        Ok(())
    }

    fn release(&mut self) {
        self.lines = None;
        self.chip = None;
    }

    fn dio_ports(&self) -> Option<Vec<PortInfo>> {
        let chip = self.chip.as_ref()?;
        let available = chip.num_lines().saturating_sub(self.base_line);
        if available == 0 {
            return None;
        }
        Some(vec![PortInfo {
            id: 0,
            name: format!("{}[{}..]", chip.name(), self.base_line),
            io_type: PortIoType::Io,
            num_bits: available.min(u32::from(SWITCH_BITS)) as u8,
        }])
    }

    fn config_port(&mut self, _port: u32, direction: Direction) -> ChannelResult<()> {
        if direction != Direction::Output {
            return Err(ChannelError::Device(
                "GPIO port only supports output".to_string(),
            ));
        }
        let chip = self
            .chip
            .as_ref()
            .ok_or_else(|| ChannelError::Device("GPIO chip not open".to_string()))?;
        let options = Options::output([self.base_line, self.base_line + 1])
            .values([false, false])
            .consumer(self.consumer.as_str());
        let lines = chip.request_lines(options).map_err(|e| {
            ChannelError::Device(format!("Failed to request GPIO lines as output: {e}"))
        })?;
        self.lines = Some(lines);
        Ok(())
    }

    fn config_bit(&mut self, port: u32, _bit: u8, direction: Direction) -> ChannelResult<()> {
        // Both lines are requested together.
        if self.lines.is_none() {
            self.config_port(port, direction)?;
        }
        Ok(())
    }

    fn write_port(&mut self, _port: u32, value: u8) -> ChannelResult<()> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| ChannelError::Device("GPIO lines not requested as output".to_string()))?;
        lines
            .set_values([value & 0b01 != 0, value & 0b10 != 0])
            .map_err(|e| ChannelError::Device(format!("Failed to set GPIO value to {value}: {e}")))
    }
}
