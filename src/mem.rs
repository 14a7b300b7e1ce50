use crate::bus::{AddressRange, Bus};
use crate::err::BusError;

use std::ops::Index;
use std::vec::Vec;

/// A flat block of memory occupying a single address range.
#[derive(Debug)]
pub struct Mem {
    address_range: AddressRange,
    ram: Vec<u8>,
    is_read_only: bool,
}

impl Mem {
    pub fn new(start_address: u32, len: usize) -> Mem {
        Mem {
            address_range: AddressRange::new(start_address, len),
            ram: vec![0; len],
            is_read_only: false,
        }
    }

    /// Memory that refuses every bus write.
    /// Use `load` to fill it.
    pub fn rom(start_address: u32, len: usize) -> Mem {
        Mem {
            is_read_only: true,
            ..Mem::new(start_address, len)
        }
    }

    pub fn address_range(&self) -> &AddressRange {
        &self.address_range
    }

    pub fn is_read_only(&self) -> bool {
        self.is_read_only
    }

    /// Load a block of bytes at the specified absolute address. Loading
    /// bypasses the read-only check.
    pub fn load(&mut self, address: u32, program: &[u8]) -> Result<(), BusError> {
        let offset = address.wrapping_sub(self.address_range.start_address) as usize;

        match offset.checked_add(program.len()) {
            Some(end) if end <= self.address_range.len => {
                self.ram[offset..end].copy_from_slice(program);
                Ok(())
            }
            _ => Err(BusError::Range(address)),
        }
    }
}

impl Bus for Mem {
    fn read_byte(&mut self, address: u32) -> Result<u8, BusError> {
        match self.address_range.offset_of(address) {
            Some(offset) => Ok(self.ram[offset]),
            None => Err(BusError::Range(address)),
        }
    }

    fn write_byte(&mut self, address: u32, val: u8) -> Result<(), BusError> {
        if self.is_read_only {
            return Err(BusError::ReadOnly(address));
        }

        match self.address_range.offset_of(address) {
            Some(offset) => {
                self.ram[offset] = val;
                Ok(())
            }
            None => Err(BusError::Range(address)),
        }
    }
}

impl Index<usize> for Mem {
    type Output = u8;

    fn index(&self, idx: usize) -> &u8 {
        &self.ram[idx]
    }
}
