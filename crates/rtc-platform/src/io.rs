use std::collections::HashMap;

pub trait PortIoDevice {
    fn read(&mut self, port: u16, size: u8) -> u32;
    fn write(&mut self, port: u16, size: u8, value: u32);

    /// Reset the device back to its power-on state.
    fn reset(&mut self) {}
}

/// Exact-port dispatch for legacy I/O devices.
///
/// Unmapped ports float high: byte reads return `0xFF`, wider reads return all ones, and writes
/// are dropped.
pub struct IoPortBus {
    devices: HashMap<u16, Box<dyn PortIoDevice>>,
}

impl IoPortBus {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    pub fn register(&mut self, port: u16, device: Box<dyn PortIoDevice>) {
        self.devices.insert(port, device);
    }

    /// Register a device for a contiguous range of I/O ports.
    ///
    /// The provided factory is invoked once per port. It is used to build per-port wrapper
    /// devices that share a single underlying implementation (e.g. via `Rc<RefCell<...>>`).
    pub fn register_shared_range<F>(&mut self, start: u16, len: u16, mut make: F)
    where
        F: FnMut(u16) -> Box<dyn PortIoDevice>,
    {
        for offset in 0..len {
            let port = start.wrapping_add(offset);
            self.register(port, make(port));
        }
    }

    pub fn is_mapped(&self, port: u16) -> bool {
        self.devices.contains_key(&port)
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        if size == 0 {
            return 0;
        }

        // x86 port I/O instructions only support access sizes {1,2,4}. Any other size floats the
        // bus high rather than reaching a device model.
        if !matches!(size, 1 | 2 | 4) {
            return 0xFFFF_FFFF;
        }
        if let Some(dev) = self.devices.get_mut(&port) {
            return dev.read(port, size);
        }

        match size {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFFFF_FFFF,
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        if !matches!(size, 1 | 2 | 4) {
            return;
        }
        match self.devices.get_mut(&port) {
            Some(device) => device.write(port, size, value),
            None => tracing::trace!(port, size, value, "write to unmapped I/O port"),
        }
    }

    pub fn read_u8(&mut self, port: u16) -> u8 {
        self.read(port, 1) as u8
    }

    pub fn write_u8(&mut self, port: u16, value: u8) {
        self.write(port, 1, value as u32);
    }

    pub fn reset(&mut self) {
        for dev in self.devices.values_mut() {
            dev.reset();
        }
    }
}

impl Default for IoPortBus {
    fn default() -> Self {
        Self::new()
    }
}
