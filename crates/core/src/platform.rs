// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::mmio::{MmioRegion, RegisterDevice};
use crate::proc_interrupts::ProcInterrupts;
use crate::uio::{UioDevice, UioFile};
use fabirq_config::{IpEntry, RuntimeConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Operating-system services resolution depends on.
pub trait Platform {
    /// Register access for the IP instance `name`.
    fn register_device(&self, name: &str, ip: &IpEntry) -> io::Result<Rc<dyn RegisterDevice>>;

    /// Device node of the UIO line bound to `raw_irq`, if any.
    fn uio_path(&self, raw_irq: u32) -> io::Result<Option<PathBuf>>;

    fn open_uio(&self, path: &Path) -> io::Result<Box<dyn UioDevice>>;
}

/// Real hardware: `/dev/mem` mappings and `/dev/uioN` nodes located through
/// `/proc/interrupts`.
#[derive(Debug, Clone, Default)]
pub struct LinuxPlatform {
    config: RuntimeConfig,
}

impl LinuxPlatform {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Platform for LinuxPlatform {
    fn register_device(&self, name: &str, ip: &IpEntry) -> io::Result<Rc<dyn RegisterDevice>> {
        tracing::debug!(
            "Mapping registers of '{}' at {:#x}",
            name,
            ip.phys_addr
        );
        let region = MmioRegion::map(&self.config.mem_device, ip.phys_addr, ip.addr_range)?;
        Ok(Rc::new(region))
    }

    fn uio_path(&self, raw_irq: u32) -> io::Result<Option<PathBuf>> {
        let table = ProcInterrupts::read(&self.config.proc_interrupts)?;
        Ok(table
            .uio_index(raw_irq, &self.config.uio_line_name)
            .map(|index| self.config.uio_device_path(index)))
    }

    fn open_uio(&self, path: &Path) -> io::Result<Box<dyn UioDevice>> {
        Ok(Box::new(UioFile::open(path)?))
    }
}
