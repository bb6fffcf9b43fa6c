// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Processing-system family the fabric is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuArch {
    #[serde(alias = "armv7l", alias = "zynq7000")]
    Zynq,
    #[serde(alias = "aarch64", alias = "zynqmp", alias = "zu")]
    ZynqUltrascale,
}

impl CpuArch {
    /// Guess the architecture from the host CPU the runtime was built for.
    pub fn detect() -> Option<Self> {
        match std::env::consts::ARCH {
            "arm" => Some(Self::Zynq),
            "aarch64" => Some(Self::ZynqUltrascale),
            _ => None,
        }
    }

    /// Raw GIC interrupt number of fabric interrupt input `index`.
    ///
    /// Both families expose sixteen PL-to-PS lines split into two banks of
    /// eight with a gap in the GIC numbering between them.
    pub fn fabric_irq(self, index: u32) -> Option<u32> {
        let (low, high) = match self {
            Self::Zynq => (61, 84),
            Self::ZynqUltrascale => (121, 136),
        };
        match index {
            0..=7 => Some(low + index),
            8..=15 => Some(high + index - 8),
            _ => None,
        }
    }
}

/// A named interrupt pin in the block design.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InterruptPin {
    /// Controller the pin is wired to; empty when wired straight to the CPU.
    #[serde(default)]
    pub controller: String,
    pub index: u32,
    #[serde(default)]
    pub raw_irq: Option<u32>,
}

/// A secondary interrupt controller instance and where its output goes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InterruptControllerEntry {
    /// Upstream controller; empty when the output drives a CPU interrupt.
    #[serde(default)]
    pub parent: String,
    pub index: u32,
    #[serde(default)]
    pub raw_irq: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IpEntry {
    pub phys_addr: u64,
    #[serde(alias = "address_range")]
    pub addr_range: u64,
    #[serde(default, rename = "type")]
    pub ip_type: Option<String>,
}

/// The slice of a hardware description the interrupt runtime consumes.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DeviceDescription {
    #[serde(default)]
    pub arch: Option<CpuArch>,
    #[serde(default)]
    pub interrupt_pins: HashMap<String, InterruptPin>,
    #[serde(default)]
    pub interrupt_controllers: HashMap<String, InterruptControllerEntry>,
    #[serde(default)]
    pub ip_dict: HashMap<String, IpEntry>,
}

impl DeviceDescription {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read device description at {:?}", path))?;

        let description = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
        .with_context(|| format!("Failed to parse device description from {:?}", path))?;

        tracing::debug!(
            "Loaded {:?}: {} pins, {} controllers",
            path,
            description.interrupt_pins.len(),
            description.interrupt_controllers.len()
        );
        Ok(description)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse device description YAML")
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse device description JSON")
    }

    /// Raw IRQ for a terminal entry: the explicit value, or the fabric
    /// interrupt map of `arch` applied to the entry's index.
    pub fn terminal_irq(&self, raw_irq: Option<u32>, index: u32) -> Option<u32> {
        raw_irq.or_else(|| self.arch.and_then(|arch| arch.fabric_irq(index)))
    }

    /// Checks that controller links resolve, every controller is mapped and
    /// no chain loops back on itself.
    pub fn validate(&self) -> Result<()> {
        for (name, pin) in &self.interrupt_pins {
            if pin.controller.is_empty() {
                if self.terminal_irq(pin.raw_irq, pin.index).is_none() {
                    anyhow::bail!("Pin '{}' is wired to the CPU but has no raw_irq", name);
                }
            } else if !self.interrupt_controllers.contains_key(&pin.controller) {
                anyhow::bail!(
                    "Pin '{}' references unknown controller '{}'",
                    name,
                    pin.controller
                );
            }
        }

        for (name, ctrl) in &self.interrupt_controllers {
            if !self.ip_dict.contains_key(name) {
                anyhow::bail!("Controller '{}' has no ip_dict entry", name);
            }
            if ctrl.parent.is_empty() {
                if self.terminal_irq(ctrl.raw_irq, ctrl.index).is_none() {
                    anyhow::bail!("Controller '{}' is terminal but has no raw_irq", name);
                }
            } else if !self.interrupt_controllers.contains_key(&ctrl.parent) {
                anyhow::bail!(
                    "Controller '{}' references unknown parent '{}'",
                    name,
                    ctrl.parent
                );
            }
        }

        for name in self.interrupt_controllers.keys() {
            let chain = self.controller_chain(name);
            let mut seen = HashSet::new();
            for link in &chain {
                if !seen.insert(link.as_str()) {
                    anyhow::bail!(
                        "Controller chain starting at '{}' loops through '{}'",
                        name,
                        link
                    );
                }
            }
        }

        Ok(())
    }

    /// Controllers between `start` and the CPU, `start` first.
    ///
    /// Stops after revisiting a name so a cyclic description still yields a
    /// finite list ending with the repeated controller.
    pub fn controller_chain(&self, start: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = start;
        while let Some(entry) = self.interrupt_controllers.get(current) {
            chain.push(current.to_string());
            if !seen.insert(current) || entry.parent.is_empty() {
                break;
            }
            current = &entry.parent;
        }
        chain
    }
}

fn default_proc_interrupts() -> PathBuf {
    PathBuf::from("/proc/interrupts")
}

fn default_dev_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_mem_device() -> PathBuf {
    PathBuf::from("/dev/mem")
}

fn default_uio_line_name() -> String {
    "fabric".to_string()
}

/// Where the Linux backend finds kernel interfaces.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_proc_interrupts")]
    pub proc_interrupts: PathBuf,
    #[serde(default = "default_dev_dir")]
    pub dev_dir: PathBuf,
    #[serde(default = "default_mem_device")]
    pub mem_device: PathBuf,
    /// Registered name of interrupt lines claimed by the UIO driver.
    #[serde(default = "default_uio_line_name")]
    pub uio_line_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            proc_interrupts: default_proc_interrupts(),
            dev_dir: default_dev_dir(),
            mem_device: default_mem_device(),
            uio_line_name: default_uio_line_name(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open runtime config at {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("Failed to parse runtime config YAML")
    }

    /// Path of UIO device node `/dev/uio<index>`.
    pub fn uio_device_path(&self, index: usize) -> PathBuf {
        self.dev_dir.join(format!("uio{}", index))
    }
}
