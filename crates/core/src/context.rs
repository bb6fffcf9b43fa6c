// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::interrupt::Target;
use crate::intc::{InterruptController, Upstream};
use crate::mmio::RegisterWindow;
use crate::platform::Platform;
use crate::uio::{UioController, UioState};
use crate::{IrqError, IrqResult};
use fabirq_config::DeviceDescription;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::info;

/// Owns the active device description and every shared controller and UIO
/// object resolved from it.
///
/// Objects are cached by controller name and raw IRQ for the lifetime of one
/// description generation. [`reload`](Self::reload) starts a new generation
/// and drops the caches; handles resolved earlier become stale.
pub struct ResolutionContext {
    platform: Box<dyn Platform>,
    description: RefCell<Rc<DeviceDescription>>,
    generation: Rc<Cell<u64>>,
    controllers: RefCell<HashMap<String, Rc<InterruptController>>>,
    uios: RefCell<BTreeMap<u32, Rc<UioController>>>,
}

impl ResolutionContext {
    pub fn new(platform: impl Platform + 'static, description: DeviceDescription) -> Self {
        Self {
            platform: Box::new(platform),
            description: RefCell::new(Rc::new(description)),
            generation: Rc::new(Cell::new(1)),
            controllers: RefCell::new(HashMap::new()),
            uios: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub(crate) fn generation_handle(&self) -> Rc<Cell<u64>> {
        self.generation.clone()
    }

    pub fn description(&self) -> Rc<DeviceDescription> {
        self.description.borrow().clone()
    }

    /// Replace the description, e.g. after a new overlay is loaded.
    pub fn reload(&self, description: DeviceDescription) {
        *self.description.borrow_mut() = Rc::new(description);
        self.generation.set(self.generation.get() + 1);
        // Stale waiters may still hold these; they must not touch hardware
        // the new generation has armed.
        for controller in self.controllers.borrow_mut().drain().map(|(_, c)| c) {
            controller.retire();
        }
        for uio in std::mem::take(&mut *self.uios.borrow_mut()).into_values() {
            uio.retire();
        }
        info!("Device description reloaded, generation {}", self.generation.get());
    }

    /// Resolve `pin` to the object its waiters register with.
    pub fn resolve_pin(&self, pin: &str) -> IrqResult<Target> {
        let description = self.description();
        let entry = description
            .interrupt_pins
            .get(pin)
            .ok_or_else(|| IrqError::UnknownPin(pin.to_string()))?;

        if entry.controller.is_empty() {
            let raw_irq = description
                .terminal_irq(entry.raw_irq, entry.index)
                .ok_or_else(|| IrqError::MissingRawIrq(pin.to_string()))?;
            Ok(Target::Direct {
                uio: self.uio(raw_irq)?,
                index: entry.index,
            })
        } else {
            Ok(Target::Chained {
                controller: self.controller(&entry.controller)?,
                index: entry.index,
            })
        }
    }

    /// Shared driver for controller `name`, built on first use.
    pub fn controller(&self, name: &str) -> IrqResult<Rc<InterruptController>> {
        self.controller_in_chain(name, &mut Vec::new())
    }

    fn controller_in_chain(
        &self,
        name: &str,
        chain: &mut Vec<String>,
    ) -> IrqResult<Rc<InterruptController>> {
        let cached = self.controllers.borrow().get(name).cloned();
        if let Some(controller) = cached {
            if controller.is_broken() {
                return Err(IrqError::Broken(format!("interrupt controller '{}'", name)));
            }
            return Ok(controller);
        }

        if chain.iter().any(|link| link == name) {
            chain.push(name.to_string());
            return Err(IrqError::ControllerCycle(chain.clone()));
        }
        chain.push(name.to_string());

        let description = self.description();
        let entry = description
            .interrupt_controllers
            .get(name)
            .ok_or_else(|| IrqError::UnknownController(name.to_string()))?;
        let ip = description
            .ip_dict
            .get(name)
            .ok_or_else(|| IrqError::MissingIpEntry(name.to_string()))?;

        let upstream = if entry.parent.is_empty() {
            let raw_irq = description
                .terminal_irq(entry.raw_irq, entry.index)
                .ok_or_else(|| IrqError::MissingRawIrq(name.to_string()))?;
            Upstream::Uio(self.uio(raw_irq)?)
        } else {
            Upstream::Controller {
                controller: self.controller_in_chain(&entry.parent, chain)?,
                line: entry.index,
            }
        };

        let device = self
            .platform
            .register_device(name, ip)
            .map_err(|e| IrqError::device_io(name, e))?;
        let controller =
            InterruptController::new(name, RegisterWindow::new(device, ip.phys_addr), upstream)?;
        info!(
            "Interrupt controller '{}' at {:#x} ready",
            name, ip.phys_addr
        );
        self.controllers
            .borrow_mut()
            .insert(name.to_string(), controller.clone());
        Ok(controller)
    }

    /// Shared UIO controller for `raw_irq`, opened on first use.
    pub fn uio(&self, raw_irq: u32) -> IrqResult<Rc<UioController>> {
        let cached = self.uios.borrow().get(&raw_irq).cloned();
        if let Some(uio) = cached {
            if uio.is_broken() {
                return Err(IrqError::Broken(format!("UIO device {:?}", uio.path())));
            }
            return Ok(uio);
        }

        let path = self
            .platform
            .uio_path(raw_irq)
            .map_err(|e| IrqError::device_io("interrupt table", e))?
            .ok_or(IrqError::NoUioDevice(raw_irq))?;
        let device = self
            .platform
            .open_uio(&path)
            .map_err(|e| IrqError::device_io(path.display().to_string(), e))?;
        let uio = UioController::new(raw_irq, path, device);
        self.uios.borrow_mut().insert(raw_irq, uio.clone());
        Ok(uio)
    }

    pub fn cached_controllers(&self) -> Vec<Rc<InterruptController>> {
        self.controllers.borrow().values().cloned().collect()
    }

    pub fn cached_uios(&self) -> Vec<Rc<UioController>> {
        self.uios.borrow().values().cloned().collect()
    }

    /// Run the readiness callback of every armed UIO device that has a
    /// firing to consume. Returns how many were dispatched.
    pub fn dispatch_ready(&self) -> usize {
        let mut dispatched = 0;
        for uio in self.cached_uios() {
            if uio.dispatch_if_ready() {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Descriptors of armed UIO devices, for blocking until one fires.
    pub fn armed_fds(&self) -> Vec<RawFd> {
        self.uios
            .borrow()
            .values()
            .filter(|uio| uio.state() == UioState::Armed)
            .filter_map(|uio| uio.raw_fd())
            .collect()
    }
}
