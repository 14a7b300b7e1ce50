//! Cycle costs and other knobs of the simulated core.

use crate::instr::OperandSize;

/// Cycle costs of the modelled microarchitecture.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Timing {
    /// Charged by every executed instruction after its fetch.
    pub base_instruction: u32,
    /// One transfer on the main memory bus.
    pub bus_cycle: u32,
    /// One transfer on the I/O bus.
    pub io_cycle: u32,
    /// Extra cost of a 32-bit ALU operation.
    pub dword_alu: u32,
    /// Extra cost of a taken branch, call, return or restart.
    pub branch_taken: u32,
    /// One idle step while halted.
    pub halt_spin: u32,
    /// Interrupt acknowledge, before the return address is pushed.
    pub interrupt_ack: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            base_instruction: 1,
            bus_cycle: 3,
            io_cycle: 4,
            dword_alu: 3,
            branch_taken: 2,
            halt_spin: 4,
            interrupt_ack: 2,
        }
    }
}

impl Timing {
    /// Cycles for one main-bus access of `size` bytes at `address`.
    pub fn memory_cycles(&self, address: u32, size: OperandSize) -> u32 {
        transfer_cycles(self.bus_cycle, address, size)
    }

    /// Cycles for one I/O-bus access of `size` bytes at `port`.
    pub fn io_cycles(&self, port: u32, size: OperandSize) -> u32 {
        transfer_cycles(self.io_cycle, port, size)
    }

    /// The 32-bit ALU surcharge, if `size` calls for it.
    pub fn alu_surcharge(&self, size: OperandSize) -> u32 {
        match size {
            OperandSize::DWord => self.dword_alu,
            _ => 0,
        }
    }
}

// A misaligned word or dword costs one more transfer than an aligned one.
fn transfer_cycles(per_transfer: u32, address: u32, size: OperandSize) -> u32 {
    let aligned = address & 1 == 0;
    let transfers = match (size, aligned) {
        (OperandSize::Byte, _) => 1,
        (OperandSize::Word, true) => 1,
        (OperandSize::Word, false) => 2,
        (OperandSize::DWord, true) => 2,
        (OperandSize::DWord, false) => 3,
    };
    per_transfer * transfers
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Config {
    pub timing: Timing,
    /// Number of executed operations kept for diagnostics. Rounded up to
    /// a power of two.
    pub history_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timing: Timing::default(),
            history_len: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_costs() {
        let t = Timing::default();
        assert_eq!(3, t.memory_cycles(0x100, OperandSize::Byte));
        assert_eq!(3, t.memory_cycles(0x101, OperandSize::Byte));
        assert_eq!(3, t.memory_cycles(0x100, OperandSize::Word));
        assert_eq!(6, t.memory_cycles(0x101, OperandSize::Word));
        assert_eq!(6, t.memory_cycles(0x100, OperandSize::DWord));
        assert_eq!(9, t.memory_cycles(0x103, OperandSize::DWord));
    }

    #[test]
    fn io_costs() {
        let t = Timing::default();
        assert_eq!(4, t.io_cycles(0x10, OperandSize::Byte));
        assert_eq!(4, t.io_cycles(0x10, OperandSize::Word));
        assert_eq!(8, t.io_cycles(0x11, OperandSize::Word));
        assert_eq!(8, t.io_cycles(0x10, OperandSize::DWord));
        assert_eq!(12, t.io_cycles(0x11, OperandSize::DWord));
    }

    #[test]
    fn surcharge_only_for_dword() {
        let t = Timing::default();
        assert_eq!(0, t.alu_surcharge(OperandSize::Byte));
        assert_eq!(0, t.alu_surcharge(OperandSize::Word));
        assert_eq!(3, t.alu_surcharge(OperandSize::DWord));
    }
}
