//! The IM8000 core: register file, both buses, the memory access layer
//! and the decode/execute driver.

mod execute;

use crate::bus::Bus;
use crate::config::{Config, Timing};
use crate::decode;
use crate::err::{ContractViolation, CpuError};
use crate::history::{History, HistoryEntry};
use crate::instr::{DecodedOperation, Form, Operand, OperandBase, OperandSize, Operation};
use crate::registers::RegisterFile;

use log::{debug, trace, warn};

const RESET_VECTOR: u32 = 0x0000_0000;
pub const NMI_VECTOR: u32 = 0x0000_0066;
pub const IM1_VECTOR: u32 = 0x0000_0038;

/// How a maskable interrupt finds its handler.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InterruptMode {
    /// Always jump to `IM1_VECTOR`.
    Mode1,
    /// Jump through the dword table at `I`, indexed by the vector byte.
    Mode2,
}

pub struct Cpu<M: Bus, I: Bus> {
    registers: RegisterFile,
    memory: M,
    io: I,
    timing: Timing,
    interrupt_mode: InterruptMode,
    halted: bool,
    nmi_pending: bool,
    irq_pending: Option<u8>,
    history: History,
}

impl<M: Bus, I: Bus> Cpu<M, I> {
    pub fn new(memory: M, io: I) -> Self {
        Cpu::with_config(memory, io, Config::default())
    }

    pub fn with_config(memory: M, io: I, config: Config) -> Self {
        Cpu {
            registers: RegisterFile::new(),
            memory,
            io,
            timing: config.timing,
            interrupt_mode: InterruptMode::Mode1,
            halted: false,
            nmi_pending: false,
            irq_pending: None,
            history: History::new(config.history_len),
        }
    }

    /// Clear all registers and interrupt state, then load PC from the
    /// reset vector at address 0.
    pub fn reset(&mut self) -> Result<(), CpuError> {
        self.registers.clear();
        self.interrupt_mode = InterruptMode::Mode1;
        self.halted = false;
        self.nmi_pending = false;
        self.irq_pending = None;
        self.history.clear();

        let (pc, _) = self.read_memory(RESET_VECTOR, OperandSize::DWord)?;
        self.registers.set_pc(pc);
        debug!("reset: PC={:08x}", pc);
        Ok(())
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn interrupt_mode(&self) -> InterruptMode {
        self.interrupt_mode
    }

    /// Latch a non-maskable interrupt. It is taken at the next decode.
    pub fn raise_nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Latch a maskable interrupt request with its vector byte. It is
    /// taken at the next decode where interrupts are enabled.
    pub fn raise_irq(&mut self, vector: u8) {
        self.irq_pending = Some(vector);
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn dump_history(&self) {
        for entry in self.history.iter() {
            debug!("{}", entry);
        }
    }

    /// Decode the instruction at `address` without touching CPU state.
    pub fn decode_at(&mut self, address: u32) -> Result<DecodedOperation, CpuError> {
        decode::decode(&mut self.memory, &self.timing, address)
    }

    /// Produce the next operation to execute: a pending interrupt, the
    /// idle halted state, or the instruction at PC.
    pub fn decode(&mut self) -> Result<DecodedOperation, CpuError> {
        let pc = self.registers.pc();

        if self.nmi_pending {
            let form = Form::new(Operation::NonMaskableInterrupt, OperandSize::DWord);
            return Ok(DecodedOperation::synthetic(pc, form));
        }

        if let Some(vector) = self.irq_pending {
            if self.registers.iff1() {
                let form = Form::new(Operation::Interrupt, OperandSize::Byte)
                    .with_operand1(Operand::immediate(u32::from(vector)));
                return Ok(DecodedOperation::synthetic(pc, form));
            }
        }

        if self.halted {
            let form = Form::new(Operation::HaltState, OperandSize::Byte);
            return Ok(DecodedOperation::synthetic(pc, form));
        }

        self.decode_at(pc)
    }

    /// Decode and execute one operation, returning the cycles it took.
    pub fn step(&mut self) -> Result<u32, CpuError> {
        let op = match self.decode() {
            Ok(op) => op,
            Err(e) => {
                warn!("decode failed at {:08x}: {}", self.registers.pc(), e);
                return Err(e);
            }
        };

        let mut entry = HistoryEntry::new(&op, 0);
        let cycles = self.execute(op)?;
        entry.cycles = cycles;

        trace!("{}", entry);
        self.history.push(entry);

        Ok(cycles)
    }

    //
    // Memory access layer. Every access returns its cycle cost so the
    // handlers can total them.
    //

    /// Address named by an indirect operand.
    pub fn effective_address(&self, operand: &Operand) -> u32 {
        let base = match operand.base {
            OperandBase::Register(target) => self.registers.get(target, OperandSize::DWord),
            OperandBase::Immediate(address) => address,
        };
        match operand.displacement {
            Some(d) => base.wrapping_add(i32::from(d) as u32),
            None => base,
        }
    }

    pub fn read_memory(&mut self, address: u32, size: OperandSize) -> Result<(u32, u32), CpuError> {
        let value = self.memory.read(address, size)?;
        Ok((value, self.timing.memory_cycles(address, size)))
    }

    pub fn write_memory(
        &mut self,
        address: u32,
        size: OperandSize,
        value: u32,
    ) -> Result<u32, CpuError> {
        self.memory.write(address, size, value)?;
        Ok(self.timing.memory_cycles(address, size))
    }

    pub fn read_io(&mut self, port: u32, size: OperandSize) -> Result<(u32, u32), CpuError> {
        let value = self.io.read(port, size)?;
        Ok((value, self.timing.io_cycles(port, size)))
    }

    pub fn write_io(&mut self, port: u32, size: OperandSize, value: u32) -> Result<u32, CpuError> {
        self.io.write(port, size, value)?;
        Ok(self.timing.io_cycles(port, size))
    }

    /// Value of an operand. Registers and immediates cost nothing;
    /// indirect operands cost a main-bus read.
    pub fn read_operand(
        &mut self,
        operand: &Operand,
        size: OperandSize,
    ) -> Result<(u32, u32), CpuError> {
        if operand.indirect {
            let address = self.effective_address(operand);
            return self.read_memory(address, size);
        }
        match operand.base {
            OperandBase::Register(target) => Ok((self.registers.get(target, size), 0)),
            OperandBase::Immediate(value) => Ok((value & size.mask(), 0)),
        }
    }

    /// Store into an operand. Immediates cannot be written.
    pub fn write_operand(
        &mut self,
        operation: Operation,
        operand: &Operand,
        size: OperandSize,
        value: u32,
    ) -> Result<u32, CpuError> {
        if operand.indirect {
            let address = self.effective_address(operand);
            return self.write_memory(address, size, value);
        }
        match operand.base {
            OperandBase::Register(target) => {
                self.registers.set(target, size, value);
                Ok(0)
            }
            OperandBase::Immediate(_) => {
                Err(ContractViolation::ImmediateWriteback { operation }.into())
            }
        }
    }

    /// Pre-decrement SP by four and store a dword.
    pub fn push(&mut self, value: u32) -> Result<u32, CpuError> {
        let sp = self.registers.sp().wrapping_sub(4);
        let cycles = self.write_memory(sp, OperandSize::DWord, value)?;
        self.registers.set_sp(sp);
        Ok(cycles)
    }

    /// Load a dword from SP and post-increment SP by four.
    pub fn pop(&mut self) -> Result<(u32, u32), CpuError> {
        let sp = self.registers.sp();
        let (value, cycles) = self.read_memory(sp, OperandSize::DWord)?;
        self.registers.set_sp(sp.wrapping_add(4));
        Ok((value, cycles))
    }
}

impl<M: Bus, I: Bus> std::fmt::Debug for Cpu<M, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("registers", &self.registers)
            .field("interrupt_mode", &self.interrupt_mode)
            .field("halted", &self.halted)
            .field("nmi_pending", &self.nmi_pending)
            .field("irq_pending", &self.irq_pending)
            .finish()
    }
}
