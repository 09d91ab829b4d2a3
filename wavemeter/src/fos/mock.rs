//! In-memory DAQ device for tests and `--simulate` runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    ChannelError, ChannelResult, DaqDescriptor, DaqDevice, DaqInventory, Direction, PortInfo,
    PortIoType,
};
use crate::channel::Channel;

/// Everything the mock device was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaqEvent {
    Connected,
    Disconnected,
    Released,
    PortConfigured(u32, Direction),
    BitConfigured(u32, u8, Direction),
    Write(u32, u8),
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    released: bool,
    fail_writes: bool,
    fail_connect: bool,
    events: Vec<DaqEvent>,
}

/// Mock DAQ device with a single digital port.
///
/// Clones share state, so a [`MockDaqHandle`] taken before the device is
/// moved into a [`FiberSwitch`](super::FiberSwitch) still sees every call.
#[derive(Debug, Clone)]
pub struct MockDaq {
    descriptor: DaqDescriptor,
    port: Option<PortInfo>,
    state: Arc<Mutex<MockState>>,
}

impl MockDaq {
    /// A device with one 8-bit whole-port output (like FIRSTPORTA on a USB-DIO24).
    pub fn new(product_name: &str) -> Self {
        Self {
            descriptor: DaqDescriptor {
                product_name: product_name.to_string(),
                unique_id: format!("MOCK-{}", product_name.len()),
                dev_string: format!("{product_name} (mock)"),
            },
            port: Some(PortInfo {
                id: 0,
                name: "FIRSTPORTA".to_string(),
                io_type: PortIoType::Io,
                num_bits: 8,
            }),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn with_port(mut self, io_type: PortIoType, num_bits: u8) -> Self {
        if let Some(port) = self.port.as_mut() {
            port.io_type = io_type;
            port.num_bits = num_bits;
        }
        self
    }

    /// A device that reports no digital I/O subsystem.
    pub fn without_dio(mut self) -> Self {
        self.port = None;
        self
    }

    /// A device whose `connect` always fails.
    pub fn with_connect_failure(self) -> Self {
        self.state().fail_connect = true;
        self
    }

    pub fn handle(&self) -> MockDaqHandle {
        MockDaqHandle {
            state: self.state.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DaqDevice for MockDaq {
    fn connect(&mut self) -> ChannelResult<()> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(ChannelError::Device(format!(
                "injected connect failure on {}",
                self.descriptor.dev_string
            )));
        }
        state.connected = true;
        state.events.push(DaqEvent::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn disconnect(&mut self) -> ChannelResult<()> {
        let mut state = self.state();
        state.connected = false;
        state.events.push(DaqEvent::Disconnected);
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state();
        state.released = true;
        state.events.push(DaqEvent::Released);
    }

    fn dio_ports(&self) -> Option<Vec<PortInfo>> {
        self.port.clone().map(|p| vec![p])
    }

    fn config_port(&mut self, port: u32, direction: Direction) -> ChannelResult<()> {
        self.state()
            .events
            .push(DaqEvent::PortConfigured(port, direction));
        Ok(())
    }

    fn config_bit(&mut self, port: u32, bit: u8, direction: Direction) -> ChannelResult<()> {
        self.state()
            .events
            .push(DaqEvent::BitConfigured(port, bit, direction));
        Ok(())
    }

    fn write_port(&mut self, port: u32, value: u8) -> ChannelResult<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(ChannelError::Device("not connected".to_string()));
        }
        if state.fail_writes {
            return Err(ChannelError::Device(format!(
                "injected write failure on port {port}"
            )));
        }
        state.events.push(DaqEvent::Write(port, value));
        Ok(())
    }
}

/// Observer for a [`MockDaq`] after it has been handed to a switch.
#[derive(Debug, Clone)]
pub struct MockDaqHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockDaqHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<DaqEvent> {
        self.state().events.clone()
    }

    /// `(port, value)` of every successful port write.
    pub fn writes(&self) -> Vec<(u32, u8)> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                DaqEvent::Write(port, value) => Some((*port, *value)),
                _ => None,
            })
            .collect()
    }

    /// Channel corresponding to the last value written, if any.
    pub fn active_channel(&self) -> Option<Channel> {
        self.writes()
            .last()
            .and_then(|(_, value)| Channel::try_from(*value & 0b11).ok())
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    /// Make subsequent port writes fail with [`ChannelError::Device`].
    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }
}

/// Inventory over a fixed list of mock devices.
#[derive(Debug, Clone, Default)]
pub struct MockInventory {
    devices: Vec<MockDaq>,
}

impl MockInventory {
    pub fn new(devices: Vec<MockDaq>) -> Self {
        Self { devices }
    }

    /// Inventory with one default mock device.
    pub fn single(product_name: &str) -> Self {
        Self::new(vec![MockDaq::new(product_name)])
    }
}

impl DaqInventory for MockInventory {
    type Device = MockDaq;

    fn list_devices(&self) -> ChannelResult<Vec<DaqDescriptor>> {
        Ok(self.devices.iter().map(|d| d.descriptor.clone()).collect())
    }

    fn open(&self, descriptor: &DaqDescriptor) -> ChannelResult<MockDaq> {
        self.devices
            .iter()
            .find(|d| &d.descriptor == descriptor)
            .cloned()
            .ok_or_else(|| ChannelError::Device(format!("{} not found", descriptor.dev_string)))
    }
}
