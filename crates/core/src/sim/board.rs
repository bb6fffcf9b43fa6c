// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{InterruptSink, SimIntc, SimUio, SimUioPort};
use crate::mmio::RegisterDevice;
use crate::platform::Platform;
use crate::proc_interrupts::ProcInterrupts;
use crate::uio::UioDevice;
use anyhow::{anyhow, bail, Context, Result};
use fabirq_config::{DeviceDescription, IpEntry, RuntimeConfig};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Register bus routing absolute addresses to simulated controllers.
#[derive(Debug, Default)]
pub struct SimBus {
    windows: RefCell<Vec<(u64, u64, Rc<SimIntc>)>>,
    accesses: Cell<u64>,
    fail_next: Cell<bool>,
}

impl SimBus {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn map(&self, base: u64, size: u64, intc: Rc<SimIntc>) {
        self.windows.borrow_mut().push((base, size, intc));
    }

    /// Register reads and writes performed so far.
    pub fn access_count(&self) -> u64 {
        self.accesses.get()
    }

    /// Make the next register access fail with an I/O error.
    pub fn fail_next(&self) {
        self.fail_next.set(true);
    }

    fn locate(&self, address: u64, length: usize) -> io::Result<(Rc<SimIntc>, u64)> {
        self.accesses.set(self.accesses.get() + 1);
        if self.fail_next.replace(false) {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("bus error at {:#x}", address),
            ));
        }
        if length != 4 || address % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported access of {} bytes at {:#x}", length, address),
            ));
        }
        self.windows
            .borrow()
            .iter()
            .find(|(base, size, _)| (*base..base + size).contains(&address))
            .map(|(base, _, intc)| (intc.clone(), address - base))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("nothing mapped at {:#x}", address),
                )
            })
    }
}

impl RegisterDevice for SimBus {
    fn read_registers(&self, address: u64, length: u32) -> io::Result<Vec<u8>> {
        let (intc, offset) = self.locate(address, length as usize)?;
        Ok(intc.read(offset)?.to_le_bytes().to_vec())
    }

    fn write_registers(&self, address: u64, data: &[u8]) -> io::Result<()> {
        let (intc, offset) = self.locate(address, data.len())?;
        let mut word = [0u8; 4];
        word.copy_from_slice(data);
        intc.write(offset, u32::from_le_bytes(word))
    }
}

/// A simulated board built from a device description.
#[derive(Debug)]
pub struct SimBoard {
    bus: Rc<SimBus>,
    intcs: BTreeMap<String, Rc<SimIntc>>,
    uios: BTreeMap<u32, Rc<SimUio>>,
    pins: HashMap<String, (Rc<dyn InterruptSink>, u32)>,
    proc_interrupts: String,
    uio_opens: Cell<u32>,
}

impl SimBoard {
    /// One controller per description entry and one UIO line per terminal
    /// raw IRQ, wired the way the description says.
    pub fn from_description(description: &DeviceDescription) -> Result<Rc<Self>> {
        let bus = SimBus::new();
        let mut intcs = BTreeMap::new();
        for name in description.interrupt_controllers.keys() {
            let ip = description
                .ip_dict
                .get(name)
                .ok_or_else(|| anyhow!("Controller '{}' has no ip_dict entry", name))?;
            let intc = SimIntc::new(name.as_str(), ip.phys_addr);
            bus.map(ip.phys_addr, ip.addr_range.max(0x20), intc.clone());
            intcs.insert(name.clone(), intc);
        }

        let mut uios: BTreeMap<u32, Rc<SimUio>> = BTreeMap::new();
        let mut uio_for = |raw_irq: u32| -> Result<Rc<SimUio>> {
            if let Some(uio) = uios.get(&raw_irq) {
                return Ok(uio.clone());
            }
            let uio = SimUio::new(raw_irq).context("Failed to create simulated UIO line")?;
            uios.insert(raw_irq, uio.clone());
            Ok(uio)
        };

        for (name, entry) in &description.interrupt_controllers {
            let intc = &intcs[name];
            if entry.parent.is_empty() {
                let raw_irq = description
                    .terminal_irq(entry.raw_irq, entry.index)
                    .ok_or_else(|| anyhow!("Controller '{}' has no raw IRQ", name))?;
                intc.connect(uio_for(raw_irq)?, 0);
            } else {
                let parent = intcs.get(&entry.parent).ok_or_else(|| {
                    anyhow!("Controller '{}' has unknown parent '{}'", name, entry.parent)
                })?;
                intc.connect(parent.clone(), entry.index);
            }
        }

        let mut pins: HashMap<String, (Rc<dyn InterruptSink>, u32)> = HashMap::new();
        for (name, pin) in &description.interrupt_pins {
            let sink: (Rc<dyn InterruptSink>, u32) = if pin.controller.is_empty() {
                let raw_irq = description
                    .terminal_irq(pin.raw_irq, pin.index)
                    .ok_or_else(|| anyhow!("Pin '{}' has no raw IRQ", name))?;
                let uio: Rc<dyn InterruptSink> = uio_for(raw_irq)?;
                (uio, 0)
            } else {
                let intc = intcs.get(&pin.controller).ok_or_else(|| {
                    anyhow!("Pin '{}' names unknown controller '{}'", name, pin.controller)
                })?;
                let intc: Rc<dyn InterruptSink> = intc.clone();
                (intc, pin.index)
            };
            pins.insert(name.clone(), sink);
        }

        let proc_interrupts = render_proc_interrupts(uios.keys().copied());
        tracing::debug!(
            "Simulated board: {} controllers, {} UIO lines",
            intcs.len(),
            uios.len()
        );
        Ok(Rc::new(Self {
            bus,
            intcs,
            uios,
            pins,
            proc_interrupts,
            uio_opens: Cell::new(0),
        }))
    }

    /// Drive the physical level of a named pin.
    pub fn set_pin(&self, name: &str, asserted: bool) -> Result<()> {
        let Some((sink, line)) = self.pins.get(name) else {
            bail!("Unknown pin '{}'", name);
        };
        sink.set_line(*line, asserted);
        Ok(())
    }

    /// Assert then release a pin.
    pub fn pulse_pin(&self, name: &str) -> Result<()> {
        self.set_pin(name, true)?;
        self.set_pin(name, false)
    }

    pub fn intc(&self, name: &str) -> Option<Rc<SimIntc>> {
        self.intcs.get(name).cloned()
    }

    pub fn uio(&self, raw_irq: u32) -> Option<Rc<SimUio>> {
        self.uios.get(&raw_irq).cloned()
    }

    pub fn bus(&self) -> Rc<SimBus> {
        self.bus.clone()
    }

    /// `/proc/interrupts` text listing this board's fabric lines.
    pub fn proc_interrupts(&self) -> &str {
        &self.proc_interrupts
    }

    /// How many times a UIO device node was opened.
    pub fn uio_open_count(&self) -> u32 {
        self.uio_opens.get()
    }

    pub fn platform(self: &Rc<Self>) -> SimPlatform {
        SimPlatform {
            board: self.clone(),
            config: RuntimeConfig::default(),
        }
    }
}

fn render_proc_interrupts(raw_irqs: impl Iterator<Item = u32>) -> String {
    let mut text = String::from("           CPU0       CPU1\n");
    text.push_str(" 16:          1          0     GIC-0  27 Edge      gt\n");
    for (virq, raw_irq) in (48..).zip(raw_irqs) {
        let _ = writeln!(
            text,
            " {:>2}:          0          0     GIC-0 {:>3} Level     fabric",
            virq, raw_irq
        );
    }
    text.push_str("IPI1:          0          0  Timer broadcast interrupts\n");
    text
}

/// [`Platform`] backed by a [`SimBoard`].
#[derive(Debug, Clone)]
pub struct SimPlatform {
    board: Rc<SimBoard>,
    config: RuntimeConfig,
}

impl SimPlatform {
    pub fn board(&self) -> &Rc<SimBoard> {
        &self.board
    }
}

impl Platform for SimPlatform {
    fn register_device(&self, name: &str, ip: &IpEntry) -> io::Result<Rc<dyn RegisterDevice>> {
        match self.board.intcs.get(name) {
            Some(intc) if intc.base() == ip.phys_addr => Ok(self.board.bus.clone()),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no simulated controller '{}' at {:#x}", name, ip.phys_addr),
            )),
        }
    }

    fn uio_path(&self, raw_irq: u32) -> io::Result<Option<PathBuf>> {
        let table = ProcInterrupts::parse(&self.board.proc_interrupts);
        Ok(table
            .uio_index(raw_irq, &self.config.uio_line_name)
            .map(|index| self.config.uio_device_path(index)))
    }

    fn open_uio(&self, path: &Path) -> io::Result<Box<dyn UioDevice>> {
        let uio = self
            .board
            .uios
            .values()
            .enumerate()
            .find(|(index, _)| self.config.uio_device_path(*index) == path)
            .map(|(_, uio)| uio.clone())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        self.board.uio_opens.set(self.board.uio_opens.get() + 1);
        Ok(Box::new(SimUioPort(uio)))
    }
}
