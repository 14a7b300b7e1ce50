use crate::err::BusError;
use crate::instr::OperandSize;

use std::fmt::Debug;

/// A byte-addressable device the CPU talks to. The CPU owns two of
/// these: the main memory bus and the I/O port bus.
///
/// Multi-byte accesses are little-endian and are built from byte
/// accesses unless a device overrides them.
pub trait Bus: Debug {
    fn read_byte(&mut self, address: u32) -> Result<u8, BusError>;
    fn write_byte(&mut self, address: u32, val: u8) -> Result<(), BusError>;

    fn read_bytes(&mut self, address: u32, buf: &mut [u8]) -> Result<(), BusError> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_byte(address.wrapping_add(i as u32))?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), BusError> {
        for (i, b) in data.iter().enumerate() {
            self.write_byte(address.wrapping_add(i as u32), *b)?;
        }
        Ok(())
    }

    /// Read a little-endian value of the given size, zero-extended.
    fn read(&mut self, address: u32, size: OperandSize) -> Result<u32, BusError> {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf[..size.bytes()])?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Write the low `size` bytes of `val`, little-endian.
    fn write(&mut self, address: u32, size: OperandSize, val: u32) -> Result<(), BusError> {
        self.write_bytes(address, &val.to_le_bytes()[..size.bytes()])
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct AddressRange {
    pub start_address: u32,
    pub len: usize,
}

impl AddressRange {
    pub fn new(start_address: u32, len: usize) -> AddressRange {
        AddressRange { start_address, len }
    }

    /// Offset of `address` into this range, if it falls inside it.
    pub fn offset_of(&self, address: u32) -> Option<usize> {
        let offset = address.wrapping_sub(self.start_address) as usize;
        if offset < self.len {
            Some(offset)
        } else {
            None
        }
    }

    pub fn contains(&self, address: u32) -> bool {
        self.offset_of(address).is_some()
    }
}
