// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use memmap2::{MmapMut, MmapOptions};
use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::rc::Rc;

/// A peripheral address space exposing register reads and writes by
/// absolute byte address.
pub trait RegisterDevice: Debug {
    fn read_registers(&self, address: u64, length: u32) -> io::Result<Vec<u8>>;
    fn write_registers(&self, address: u64, data: &[u8]) -> io::Result<()>;
}

/// The 32-bit register file of one IP instance inside a [`RegisterDevice`].
#[derive(Debug, Clone)]
pub struct RegisterWindow {
    device: Rc<dyn RegisterDevice>,
    base: u64,
}

impl RegisterWindow {
    pub fn new(device: Rc<dyn RegisterDevice>, base: u64) -> Self {
        Self { device, base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn read_u32(&self, offset: u64) -> io::Result<u32> {
        let bytes = self.device.read_registers(self.base + offset, 4)?;
        let word: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "short register read at {:#x}: {} bytes",
                    self.base + offset,
                    bytes.len()
                ),
            )
        })?;
        let value = u32::from_le_bytes(word);
        tracing::trace!("read  {:#010x} = {:#010x}", self.base + offset, value);
        Ok(value)
    }

    pub fn write_u32(&self, offset: u64, value: u32) -> io::Result<()> {
        tracing::trace!("write {:#010x} = {:#010x}", self.base + offset, value);
        self.device
            .write_registers(self.base + offset, &value.to_le_bytes())
    }
}

/// Physical address range mapped through `/dev/mem`.
#[derive(Debug)]
pub struct MmioRegion {
    phys_addr: u64,
    length: u64,
    page_offset: usize,
    // Kept alive for `ptr`.
    _map: MmapMut,
    ptr: *mut u8,
}

impl MmioRegion {
    pub fn map(mem_device: &Path, phys_addr: u64, length: u64) -> io::Result<Self> {
        if length == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("empty MMIO range at {:#x}", phys_addr),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(mem_device)?;

        let page_size = page_size() as u64;
        let page_base = phys_addr & !(page_size - 1);
        let page_offset = (phys_addr - page_base) as usize;
        let map_len = page_offset + length as usize;

        let mut map = unsafe {
            MmapOptions::new()
                .offset(page_base)
                .len(map_len)
                .map_mut(&file)?
        };
        let ptr = map.as_mut_ptr();
        tracing::debug!(
            "Mapped {:#x}+{:#x} from {:?}",
            phys_addr,
            length,
            mem_device
        );
        Ok(Self {
            phys_addr,
            length,
            page_offset,
            _map: map,
            ptr,
        })
    }

    fn word_offset(&self, address: u64, length: u64) -> io::Result<usize> {
        let in_range = address >= self.phys_addr
            && address
                .checked_add(length)
                .is_some_and(|end| end <= self.phys_addr + self.length);
        if !in_range {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "access {:#x}+{} outside MMIO range {:#x}+{:#x}",
                    address, length, self.phys_addr, self.length
                ),
            ));
        }
        if address % 4 != 0 || length % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unaligned MMIO access {:#x}+{}", address, length),
            ));
        }
        Ok(self.page_offset + (address - self.phys_addr) as usize)
    }
}

impl RegisterDevice for MmioRegion {
    fn read_registers(&self, address: u64, length: u32) -> io::Result<Vec<u8>> {
        let start = self.word_offset(address, length as u64)?;
        let mut out = Vec::with_capacity(length as usize);
        for word in 0..(length as usize / 4) {
            // In range and aligned per word_offset.
            let value = unsafe { (self.ptr.add(start + word * 4) as *const u32).read_volatile() };
            out.extend_from_slice(&value.to_le_bytes());
        }
        Ok(out)
    }

    fn write_registers(&self, address: u64, data: &[u8]) -> io::Result<()> {
        let start = self.word_offset(address, data.len() as u64)?;
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            unsafe { (self.ptr.add(start + i * 4) as *mut u32).write_volatile(value) };
        }
        Ok(())
    }
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
