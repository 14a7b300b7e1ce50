//! The execution engine: one handler per operation.
//!
//! PC is advanced past the instruction before its handler runs, so
//! relative branches and pushed return addresses see the address of the
//! next instruction. Handlers return the cycles they spent beyond the
//! fetch; `execute` adds the fetch cost on top.

use super::{Cpu, InterruptMode, IM1_VECTOR, NMI_VECTOR};
use crate::alu::{self, AluResult, Shift};
use crate::bus::Bus;
use crate::err::{ContractViolation, CpuError};
use crate::instr::{DecodedOperation, Operand, OperandSize, Operation};
use crate::registers::{
    FlagState, RegisterTarget, F_CARRY, F_ENABLE_INTERRUPTS, F_HALF_CARRY, F_PARITY_OVERFLOW,
    F_SUBTRACT, F_ZERO,
};
use crate::utils::{halves, is_negative, is_zero, join_halves, parity_even, sign_extend_size};

use log::debug;

fn no_operands(op: &DecodedOperation) -> Result<(), ContractViolation> {
    match (op.operand1(), op.operand2()) {
        (None, None) => Ok(()),
        _ => Err(ContractViolation::Arity {
            operation: op.operation(),
            expected: 0,
        }),
    }
}

fn one_operand(op: &DecodedOperation) -> Result<Operand, ContractViolation> {
    match (op.operand1(), op.operand2()) {
        (Some(a), None) => Ok(*a),
        _ => Err(ContractViolation::Arity {
            operation: op.operation(),
            expected: 1,
        }),
    }
}

fn two_operands(op: &DecodedOperation) -> Result<(Operand, Operand), ContractViolation> {
    match (op.operand1(), op.operand2()) {
        (Some(a), Some(b)) => Ok((*a, *b)),
        _ => Err(ContractViolation::Arity {
            operation: op.operation(),
            expected: 2,
        }),
    }
}

fn register_operand(
    op: &DecodedOperation,
    operand: &Operand,
) -> Result<RegisterTarget, ContractViolation> {
    match operand.target() {
        Some(target) if !operand.indirect => Ok(target),
        _ => Err(ContractViolation::RegisterRequired {
            operation: op.operation(),
        }),
    }
}

fn memory_operand(op: &DecodedOperation, operand: &Operand) -> Result<(), ContractViolation> {
    if operand.indirect {
        Ok(())
    } else {
        Err(ContractViolation::MemoryRequired {
            operation: op.operation(),
        })
    }
}

/// Register code 000 at the given width: A, or AF for dwords.
fn accumulator(size: OperandSize) -> RegisterTarget {
    match size {
        OperandSize::DWord => RegisterTarget::AF,
        _ => RegisterTarget::A,
    }
}

const MAIN_PAIRS: [RegisterTarget; 3] =
    [RegisterTarget::BC, RegisterTarget::DE, RegisterTarget::HL];
const INDEX_PAIRS: [RegisterTarget; 3] =
    [RegisterTarget::IX, RegisterTarget::IY, RegisterTarget::SP];

#[derive(Clone, Copy)]
enum Direction {
    Increment,
    Decrement,
}

impl Direction {
    fn apply(self, address: u32, size: OperandSize) -> u32 {
        match self {
            Direction::Increment => address.wrapping_add(size.bytes() as u32),
            Direction::Decrement => address.wrapping_sub(size.bytes() as u32),
        }
    }
}

impl<M: Bus, I: Bus> Cpu<M, I> {
    /// Execute a decoded operation and return the cycles it took,
    /// fetch included.
    pub fn execute(&mut self, op: DecodedOperation) -> Result<u32, CpuError> {
        use Operation::*;

        let next = self.registers.pc().wrapping_add(op.len());
        self.registers.set_pc(next);

        let cycles = match op.operation() {
            Interrupt => self.interrupt(&op)?,
            NonMaskableInterrupt => self.non_maskable_interrupt(&op)?,
            HaltState => {
                no_operands(&op)?;
                self.timing.halt_spin
            }

            Ld | LdINn | LdRA => self.ld(&op)?,
            LdAR => self.ld_a_r(&op)?,
            Ex => self.ex(&op)?,
            ExAlt => self.ex_alt(&op)?,
            Exx => self.exchange_set(&op, &MAIN_PAIRS)?,
            Exi => self.exchange_set(&op, &INDEX_PAIRS)?,
            Exh => self.exh(&op)?,
            Push => self.push_op(&op)?,
            Pop => self.pop_op(&op)?,
            In => self.input(&op)?,
            Out => self.output(&op)?,

            Ldi => self.block_load(&op, Direction::Increment, false)?,
            Ldir => self.block_load(&op, Direction::Increment, true)?,
            Ldd => self.block_load(&op, Direction::Decrement, false)?,
            Lddr => self.block_load(&op, Direction::Decrement, true)?,
            Cpi => self.block_compare(&op, Direction::Increment, false)?,
            Cpir => self.block_compare(&op, Direction::Increment, true)?,
            Cpd => self.block_compare(&op, Direction::Decrement, false)?,
            Cpdr => self.block_compare(&op, Direction::Decrement, true)?,
            Tsi => self.block_test(&op, Direction::Increment, false)?,
            Tsir => self.block_test(&op, Direction::Increment, true)?,
            Tsd => self.block_test(&op, Direction::Decrement, false)?,
            Tsdr => self.block_test(&op, Direction::Decrement, true)?,
            Ini => self.block_input(&op, Direction::Increment, false)?,
            Inir => self.block_input(&op, Direction::Increment, true)?,
            Ind => self.block_input(&op, Direction::Decrement, false)?,
            Indr => self.block_input(&op, Direction::Decrement, true)?,
            Outi => self.block_output(&op, Direction::Increment, false)?,
            Otir => self.block_output(&op, Direction::Increment, true)?,
            Outd => self.block_output(&op, Direction::Decrement, false)?,
            Otdr => self.block_output(&op, Direction::Decrement, true)?,

            Add => self.binary_alu(&op, true, |a, b, _, size| alu::add(a, b, false, size))?,
            Adc => self.binary_alu(&op, true, alu::add)?,
            Sub => self.binary_alu(&op, true, |a, b, _, size| alu::sub(a, b, false, size))?,
            Sbc => self.binary_alu(&op, true, alu::sub)?,
            Cp => self.binary_alu(&op, false, |a, b, _, size| alu::sub(a, b, false, size))?,
            And => self.binary_alu(&op, true, |a, b, _, size| alu::and(a, b, size))?,
            Or => self.binary_alu(&op, true, |a, b, _, size| alu::or(a, b, size))?,
            Xor => self.binary_alu(&op, true, |a, b, _, size| alu::xor(a, b, size))?,
            Tst => self.binary_alu(&op, false, |a, b, _, size| alu::and(a, b, size))?,

            Inc => self.unary_alu(&op, alu::inc)?,
            Dec => self.unary_alu(&op, alu::dec)?,
            Neg => self.unary_alu(&op, alu::neg)?,
            Cpl => self.unary_alu(&op, alu::cpl)?,
            Ext => self.ext(&op)?,
            Mlt => self.mlt(&op)?,
            Div => self.div(&op, false)?,
            Sdiv => self.div(&op, true)?,
            Daa => self.daa(&op)?,

            Bit => self.bit(&op)?,
            Set => self.modify_bit(&op, alu::set_bit)?,
            Res => self.modify_bit(&op, alu::reset_bit)?,

            Rlc => self.shift(&op, Shift::Rlc)?,
            Rrc => self.shift(&op, Shift::Rrc)?,
            Rl => self.shift(&op, Shift::Rl)?,
            Rr => self.shift(&op, Shift::Rr)?,
            Sla => self.shift(&op, Shift::Sla)?,
            Sra => self.shift(&op, Shift::Sra)?,
            Srl => self.shift(&op, Shift::Srl)?,
            Rld => self.rotate_digit(&op, true)?,
            Rrd => self.rotate_digit(&op, false)?,

            Jp | JrS8 | Jr => self.jump(&op)?,
            Call | CallrS8 | Callr => self.call(&op)?,
            Ret | Reti => self.ret(&op)?,
            Retn => {
                let taken = self.condition_holds(&op);
                let cycles = self.ret(&op)?;
                if taken {
                    self.registers.restore_iff1();
                }
                cycles
            }
            Djnz => self.djnz(&op)?,
            Janz => self.janz(&op)?,
            Rst => self.rst(&op)?,

            Nop => {
                no_operands(&op)?;
                self.timing.base_instruction
            }
            Halt => {
                no_operands(&op)?;
                debug!("HALT at {:08x}", op.base_address());
                self.halted = true;
                self.timing.base_instruction
            }
            Ei => self.set_interrupts_enabled(&op, true)?,
            Di => self.set_interrupts_enabled(&op, false)?,
            Im1 => self.set_interrupt_mode(&op, InterruptMode::Mode1)?,
            Im2 => self.set_interrupt_mode(&op, InterruptMode::Mode2)?,
            Ccf => {
                no_operands(&op)?;
                let carry = self.registers.flag(F_CARRY);
                self.registers.set_flag(F_HALF_CARRY, carry);
                self.registers.set_flag(F_CARRY, !carry);
                self.registers.set_flag(F_SUBTRACT, false);
                self.timing.base_instruction
            }
            Scf => {
                no_operands(&op)?;
                self.registers.set_flag(F_CARRY, true);
                self.registers.set_flag(F_HALF_CARRY | F_SUBTRACT, false);
                self.timing.base_instruction
            }
        };

        Ok(op.fetch_cycles() + cycles)
    }

    //
    // Interrupts
    //

    fn non_maskable_interrupt(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        no_operands(op)?;
        self.nmi_pending = false;
        self.halted = false;
        // IFF2 keeps the pre-NMI state so RETN can restore it.
        self.registers.clear_iff1();

        let pc = self.registers.pc();
        let push = self.push(pc)?;
        self.registers.set_pc(NMI_VECTOR);
        debug!("NMI: return to {:08x}", pc);

        Ok(self.timing.interrupt_ack + push)
    }

    fn interrupt(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let (vector, _) = self.read_operand(&operand, OperandSize::Byte)?;
        self.irq_pending = None;
        self.halted = false;
        self.registers.set_flag(F_ENABLE_INTERRUPTS, false);

        let pc = self.registers.pc();
        let mut cycles = self.timing.interrupt_ack + self.push(pc)?;

        let handler = match self.interrupt_mode {
            InterruptMode::Mode1 => IM1_VECTOR,
            InterruptMode::Mode2 => {
                let table = self.registers.get(RegisterTarget::I, OperandSize::DWord);
                let entry = table.wrapping_add(vector << 2);
                let (handler, read) = self.read_memory(entry, OperandSize::DWord)?;
                cycles += read;
                handler
            }
        };
        self.registers.set_pc(handler);
        debug!("IRQ {:#04x}: {:08x} -> {:08x}", vector, pc, handler);

        Ok(cycles)
    }

    //
    // Loads and exchanges
    //

    fn ld(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let (dst, src) = two_operands(op)?;
        let size = op.size();
        let (value, read) = self.read_operand(&src, size)?;
        let write = self.write_operand(op.operation(), &dst, size, value)?;
        Ok(self.timing.base_instruction + read + write)
    }

    fn ld_a_r(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let cycles = self.ld(op)?;
        let size = op.size();
        let value = self.registers.get(RegisterTarget::A, size);
        let flags = FlagState {
            sign: is_negative(value, size),
            zero: is_zero(value, size),
            half_carry: false,
            parity_overflow: self.registers.iff2(),
            subtract: false,
            carry: self.registers.flag(F_CARRY),
        };
        self.registers.set_flags(flags);
        Ok(cycles)
    }

    fn ex(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let (a, b) = two_operands(op)?;
        let size = op.size();
        if a.is_immediate() || b.is_immediate() {
            return Err(ContractViolation::ImmediateWriteback {
                operation: op.operation(),
            }
            .into());
        }
        let (va, read_a) = self.read_operand(&a, size)?;
        let (vb, read_b) = self.read_operand(&b, size)?;
        let write_a = self.write_operand(op.operation(), &a, size, vb)?;
        let write_b = self.write_operand(op.operation(), &b, size, va)?;
        Ok(self.timing.base_instruction + read_a + read_b + write_a + write_b)
    }

    fn ex_alt(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let target = register_operand(op, &operand)?;
        if op.size() == OperandSize::Byte {
            return Err(ContractViolation::UnsupportedSize {
                operation: op.operation(),
                size: op.size(),
            }
            .into());
        }
        self.registers.exchange_with_alternate(target, op.size());
        Ok(self.timing.base_instruction)
    }

    fn exchange_set(
        &mut self,
        op: &DecodedOperation,
        targets: &[RegisterTarget],
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        for target in targets {
            self.registers.exchange_with_alternate(*target, OperandSize::DWord);
        }
        Ok(self.timing.base_instruction)
    }

    fn exh(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let size = op.size();
        let (value, read) = self.read_operand(&operand, size)?;
        let (low, high) = halves(value, size);
        let swapped = join_halves(high, low, size);
        let write = self.write_operand(op.operation(), &operand, size, swapped)?;
        Ok(self.timing.base_instruction + read + write)
    }

    fn push_op(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let (value, read) = self.read_operand(&operand, op.size())?;
        let push = self.push(sign_extend_size(value, op.size()))?;
        Ok(self.timing.base_instruction + read + push)
    }

    fn pop_op(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        if operand.is_immediate() {
            return Err(ContractViolation::ImmediateWriteback {
                operation: op.operation(),
            }
            .into());
        }
        let (value, pop) = self.pop()?;
        let write = self.write_operand(op.operation(), &operand, op.size(), value)?;
        Ok(self.timing.base_instruction + pop + write)
    }

    fn input(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let (dst, port) = two_operands(op)?;
        memory_operand(op, &port)?;
        let size = op.size();
        let address = self.effective_address(&port);
        let (value, read) = self.read_io(address, size)?;
        let write = self.write_operand(op.operation(), &dst, size, value)?;
        Ok(self.timing.base_instruction + read + write)
    }

    fn output(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let (port, src) = two_operands(op)?;
        memory_operand(op, &port)?;
        let size = op.size();
        let (value, read) = self.read_operand(&src, size)?;
        let address = self.effective_address(&port);
        let write = self.write_io(address, size, value)?;
        Ok(self.timing.base_instruction + read + write)
    }

    //
    // Block operations. Repeating forms that are not finished wind PC
    // back onto themselves and pay one extra cycle.
    //

    fn repeat(&mut self, op: &DecodedOperation) -> u32 {
        let pc = self.registers.pc().wrapping_sub(op.len());
        self.registers.set_pc(pc);
        1
    }

    fn block_pointer(&self, target: RegisterTarget) -> u32 {
        self.registers.get(target, OperandSize::DWord)
    }

    fn step_pointer(&mut self, target: RegisterTarget, direction: Direction, size: OperandSize) {
        let next = direction.apply(self.block_pointer(target), size);
        self.registers.set(target, OperandSize::DWord, next);
    }

    /// Decrement BC and report whether it is still non-zero.
    fn count_down_bc(&mut self) -> bool {
        let bc = self.block_pointer(RegisterTarget::BC).wrapping_sub(1);
        self.registers.set(RegisterTarget::BC, OperandSize::DWord, bc);
        bc != 0
    }

    /// Decrement B and report whether it is still non-zero.
    fn count_down_b(&mut self) -> bool {
        let b = self.registers.get(RegisterTarget::B, OperandSize::Word).wrapping_sub(1) & 0xffff;
        self.registers.set(RegisterTarget::B, OperandSize::Word, b);
        b != 0
    }

    fn block_load(
        &mut self,
        op: &DecodedOperation,
        direction: Direction,
        repeat: bool,
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        let size = op.size();
        let hl = self.block_pointer(RegisterTarget::HL);
        let de = self.block_pointer(RegisterTarget::DE);

        let (value, read) = self.read_memory(hl, size)?;
        let write = self.write_memory(de, size, value)?;
        self.step_pointer(RegisterTarget::HL, direction, size);
        self.step_pointer(RegisterTarget::DE, direction, size);
        let more = self.count_down_bc();

        self.registers.set_flag(F_HALF_CARRY | F_SUBTRACT, false);
        self.registers.set_flag(F_PARITY_OVERFLOW, more);

        let mut cycles = self.timing.base_instruction + read + write;
        if repeat && more {
            cycles += self.repeat(op);
        }
        Ok(cycles)
    }

    fn block_compare(
        &mut self,
        op: &DecodedOperation,
        direction: Direction,
        repeat: bool,
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        let size = op.size();
        let hl = self.block_pointer(RegisterTarget::HL);
        let acc = self.registers.get(accumulator(size), size);

        let (value, read) = self.read_memory(hl, size)?;
        let result = alu::sub(acc, value, false, size);
        self.step_pointer(RegisterTarget::HL, direction, size);
        let more = self.count_down_bc();

        self.registers.set_flags(FlagState {
            parity_overflow: more,
            carry: self.registers.flag(F_CARRY),
            ..result.flags
        });

        let mut cycles = self.timing.base_instruction + read + self.timing.alu_surcharge(size);
        if repeat && more && !result.flags.zero {
            cycles += self.repeat(op);
        }
        Ok(cycles)
    }

    fn block_test(
        &mut self,
        op: &DecodedOperation,
        direction: Direction,
        repeat: bool,
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        let size = op.size();
        let hl = self.block_pointer(RegisterTarget::HL);
        let acc = self.registers.get(accumulator(size), size);

        let (value, read) = self.read_memory(hl, size)?;
        let result = alu::and(acc, value, size);
        self.step_pointer(RegisterTarget::HL, direction, size);
        let more = self.count_down_bc();

        self.registers.set_flags(FlagState {
            parity_overflow: more,
            carry: self.registers.flag(F_CARRY),
            ..result.flags
        });

        let mut cycles = self.timing.base_instruction + read + self.timing.alu_surcharge(size);
        if repeat && more && result.flags.zero {
            cycles += self.repeat(op);
        }
        Ok(cycles)
    }

    fn block_input(
        &mut self,
        op: &DecodedOperation,
        direction: Direction,
        repeat: bool,
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        let size = op.size();
        let port = self.registers.get(RegisterTarget::C, OperandSize::Word);
        let hl = self.block_pointer(RegisterTarget::HL);

        let (value, read) = self.read_io(port, size)?;
        let write = self.write_memory(hl, size, value)?;
        self.step_pointer(RegisterTarget::HL, direction, size);
        let more = self.count_down_b();

        self.registers.set_flag(F_ZERO, !more);
        self.registers.set_flag(F_SUBTRACT, true);

        let mut cycles = self.timing.base_instruction + read + write;
        if repeat && more {
            cycles += self.repeat(op);
        }
        Ok(cycles)
    }

    fn block_output(
        &mut self,
        op: &DecodedOperation,
        direction: Direction,
        repeat: bool,
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        let size = op.size();
        let port = self.registers.get(RegisterTarget::C, OperandSize::Word);
        let hl = self.block_pointer(RegisterTarget::HL);

        let (value, read) = self.read_memory(hl, size)?;
        let write = self.write_io(port, size, value)?;
        self.step_pointer(RegisterTarget::HL, direction, size);
        let more = self.count_down_b();

        self.registers.set_flag(F_ZERO, !more);
        self.registers.set_flag(F_SUBTRACT, true);

        let mut cycles = self.timing.base_instruction + read + write;
        if repeat && more {
            cycles += self.repeat(op);
        }
        Ok(cycles)
    }

    //
    // Arithmetic and logic
    //

    fn binary_alu<F>(
        &mut self,
        op: &DecodedOperation,
        writeback: bool,
        f: F,
    ) -> Result<u32, CpuError>
    where
        F: Fn(u32, u32, bool, OperandSize) -> AluResult,
    {
        let (dst, src) = two_operands(op)?;
        let size = op.size();
        let (a, read_a) = self.read_operand(&dst, size)?;
        let (b, read_b) = self.read_operand(&src, size)?;
        let result = f(a, b, self.registers.flag(F_CARRY), size);

        let write = if writeback {
            self.write_operand(op.operation(), &dst, size, result.value)?
        } else {
            0
        };
        self.registers.set_flags(result.flags);

        Ok(self.timing.base_instruction + read_a + read_b + write + self.timing.alu_surcharge(size))
    }

    fn unary_alu<F>(&mut self, op: &DecodedOperation, f: F) -> Result<u32, CpuError>
    where
        F: Fn(u32, OperandSize) -> AluResult,
    {
        let operand = one_operand(op)?;
        let size = op.size();
        let (value, read) = self.read_operand(&operand, size)?;
        let result = f(value, size);
        let write = self.write_operand(op.operation(), &operand, size, result.value)?;
        self.registers.set_flags(result.flags);
        Ok(self.timing.base_instruction + read + write + self.timing.alu_surcharge(size))
    }

    fn ext(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let size = op.size();
        let (value, read) = self.read_operand(&operand, size)?;
        let write = self.write_operand(op.operation(), &operand, size, alu::ext(value, size))?;
        Ok(self.timing.base_instruction + read + write + self.timing.alu_surcharge(size))
    }

    fn mlt(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let size = op.size();
        let (value, read) = self.read_operand(&operand, size)?;
        let write = self.write_operand(op.operation(), &operand, size, alu::mlt(value, size))?;
        Ok(self.timing.base_instruction
            + read
            + write
            + alu::mul_div_cycles(value, size)
            + self.timing.alu_surcharge(size))
    }

    /// Divide the high half by the low half. A zero divisor only sets
    /// the overflow flag and leaves the operand alone.
    fn div(&mut self, op: &DecodedOperation, signed: bool) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let size = op.size();
        let (value, read) = self.read_operand(&operand, size)?;
        let mut cycles = self.timing.base_instruction
            + read
            + alu::mul_div_cycles(value, size)
            + self.timing.alu_surcharge(size);

        match alu::div(value, size, signed) {
            Some(result) => {
                cycles += self.write_operand(op.operation(), &operand, size, result)?;
                let (quotient, _) = halves(result, size);
                let half_sign = 1 << (size.bits() / 2 - 1);
                self.registers.set_flags(FlagState {
                    sign: quotient & half_sign != 0,
                    zero: quotient == 0,
                    ..FlagState::default()
                });
            }
            None => self.registers.set_flag(F_PARITY_OVERFLOW, true),
        }
        Ok(cycles)
    }

    fn daa(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        no_operands(op)?;
        let a = self.registers.get(RegisterTarget::A, OperandSize::Byte);
        let result = alu::daa(a, self.registers.flags());
        self.registers.set(RegisterTarget::A, OperandSize::Byte, result.value);
        self.registers.set_flags(result.flags);
        Ok(self.timing.base_instruction)
    }

    //
    // Bits, rotates and shifts
    //

    fn bit(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let (target, index) = two_operands(op)?;
        let size = op.size();
        let (value, read_value) = self.read_operand(&target, size)?;
        let (index, read_index) = self.read_operand(&index, size)?;

        let set = alu::test_bit(value, index, size);
        self.registers.set_flags(FlagState {
            zero: !set,
            half_carry: false,
            subtract: false,
            ..self.registers.flags()
        });

        Ok(self.timing.base_instruction + read_value + read_index + self.timing.alu_surcharge(size))
    }

    fn modify_bit<F>(&mut self, op: &DecodedOperation, f: F) -> Result<u32, CpuError>
    where
        F: Fn(u32, u32, OperandSize) -> u32,
    {
        let (target, index) = two_operands(op)?;
        let size = op.size();
        let (value, read_value) = self.read_operand(&target, size)?;
        let (index, read_index) = self.read_operand(&index, size)?;
        let write = self.write_operand(op.operation(), &target, size, f(value, index, size))?;
        let surcharge = self.timing.alu_surcharge(size);
        Ok(self.timing.base_instruction + read_value + read_index + write + surcharge)
    }

    /// Each single-bit step costs one cycle, plus the dword surcharge.
    fn shift(&mut self, op: &DecodedOperation, kind: Shift) -> Result<u32, CpuError> {
        let (target, amount) = two_operands(op)?;
        let size = op.size();
        let (value, read_value) = self.read_operand(&target, size)?;
        let (amount, read_amount) = self.read_operand(&amount, size)?;

        let result = alu::shift(kind, value, amount, self.registers.flag(F_CARRY), size);
        let write = self.write_operand(op.operation(), &target, size, result.value)?;
        self.registers.set_flags(result.flags);

        let steps = amount.saturating_mul(1 + self.timing.alu_surcharge(size));
        let cycles = self.timing.base_instruction + read_value + read_amount + write;
        Ok(cycles.saturating_add(steps))
    }

    /// RLD/RRD: rotate a BCD digit between the low byte of A and (HL).
    fn rotate_digit(&mut self, op: &DecodedOperation, left: bool) -> Result<u32, CpuError> {
        no_operands(op)?;
        let hl = self.block_pointer(RegisterTarget::HL);
        let a = self.registers.get(RegisterTarget::A, OperandSize::Byte);
        let (m, read) = self.read_memory(hl, OperandSize::Byte)?;

        let (new_a, new_m) = if left {
            ((a & 0xf0) | (m >> 4), ((m << 4) | (a & 0x0f)) & 0xff)
        } else {
            ((a & 0xf0) | (m & 0x0f), ((a & 0x0f) << 4) | (m >> 4))
        };

        let write = self.write_memory(hl, OperandSize::Byte, new_m)?;
        self.registers.set(RegisterTarget::A, OperandSize::Byte, new_a);
        self.registers.set_flags(FlagState {
            sign: is_negative(new_a, OperandSize::Byte),
            zero: is_zero(new_a, OperandSize::Byte),
            half_carry: false,
            parity_overflow: parity_even(new_a, OperandSize::Byte),
            subtract: false,
            carry: self.registers.flag(F_CARRY),
        });

        Ok(self.timing.base_instruction + read + write)
    }

    //
    // Control flow
    //

    fn condition_holds(&self, op: &DecodedOperation) -> bool {
        op.condition().holds(&self.registers.flags())
    }

    /// Absolute target of a jump or call. Relative forms are signed
    /// offsets from the already-advanced PC.
    fn branch_target(&mut self, op: &DecodedOperation) -> Result<(u32, u32), CpuError> {
        let operand = one_operand(op)?;
        let size = op.size();
        let (value, read) = self.read_operand(&operand, size)?;
        let target = if op.operation().is_relative() {
            self.registers.pc().wrapping_add(sign_extend_size(value, size))
        } else {
            value
        };
        Ok((target, read))
    }

    fn jump(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        if !self.condition_holds(op) {
            one_operand(op)?;
            return Ok(0);
        }
        let (target, read) = self.branch_target(op)?;
        self.registers.set_pc(target);
        Ok(self.timing.branch_taken + read)
    }

    fn call(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        if !self.condition_holds(op) {
            one_operand(op)?;
            return Ok(0);
        }
        let (target, read) = self.branch_target(op)?;
        let push = self.push(self.registers.pc())?;
        self.registers.set_pc(target);
        Ok(self.timing.branch_taken + read + push)
    }

    /// Returns zero cycles when the condition fails.
    fn ret(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        no_operands(op)?;
        if !self.condition_holds(op) {
            return Ok(0);
        }
        let (target, pop) = self.pop()?;
        self.registers.set_pc(target);
        Ok(self.timing.branch_taken + pop)
    }

    fn djnz(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        one_operand(op)?;
        let mut cycles = self.timing.base_instruction;
        if self.count_down_b() {
            let (target, read) = self.branch_target(op)?;
            self.registers.set_pc(target);
            cycles += self.timing.branch_taken + read;
        }
        Ok(cycles)
    }

    fn janz(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        one_operand(op)?;
        if self.registers.get(RegisterTarget::A, OperandSize::Word) == 0 {
            return Ok(0);
        }
        let (target, read) = self.branch_target(op)?;
        self.registers.set_pc(target);
        Ok(self.timing.branch_taken + read)
    }

    fn rst(&mut self, op: &DecodedOperation) -> Result<u32, CpuError> {
        let operand = one_operand(op)?;
        let (target, read) = self.read_operand(&operand, op.size())?;
        let push = self.push(self.registers.pc())?;
        self.registers.set_pc(target);
        Ok(self.timing.branch_taken + read + push)
    }

    //
    // System control
    //

    fn set_interrupts_enabled(
        &mut self,
        op: &DecodedOperation,
        enabled: bool,
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        self.registers.set_flag(F_ENABLE_INTERRUPTS, enabled);
        Ok(self.timing.base_instruction)
    }

    fn set_interrupt_mode(
        &mut self,
        op: &DecodedOperation,
        mode: InterruptMode,
    ) -> Result<u32, CpuError> {
        no_operands(op)?;
        self.interrupt_mode = mode;
        Ok(self.timing.base_instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::testing::*;
    use crate::instr::Form;
    use crate::registers::RegisterTarget as R;
    use proptest::prelude::*;

    fn dword(value: u32) -> Vec<u8> {
        value.to_le_bytes().to_vec()
    }

    fn get(cpu: &TestCpu, target: R, size: OperandSize) -> u32 {
        cpu.registers().get(target, size)
    }

    fn set(cpu: &mut TestCpu, target: R, size: OperandSize, value: u32) {
        cpu.registers_mut().set(target, size, value);
    }

    #[test]
    fn load_immediate_costs_fetch_and_base() {
        let program = [rr(0, BYTE, L, IMM), vec![0x2a]].concat();
        do_with_program(&program, |cpu| {
            assert_eq!(7, cpu.step().unwrap());
            assert_eq!(0x2a, get(cpu, R::L, OperandSize::Byte));
            assert_eq!(BASE + 3, cpu.registers().pc());
        });
    }

    #[test]
    fn load_from_memory_adds_bus_read() {
        do_with_program(&rm(0, true, WORD, A, HL), |cpu| {
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            cpu.memory_mut().load(0x2000, &[0x34, 0x12]).unwrap();
            assert_eq!(7, cpu.step().unwrap());
            assert_eq!(0x1234, get(cpu, R::A, OperandSize::Word));
        });
    }

    #[test]
    fn store_through_direct_address() {
        let program = [rm(0, false, WORD, A, DIRECT), dword(0x2001)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Word, 0xbeef);
            // 3 + 6 fetch, 1 base, 6 for the misaligned word
            assert_eq!(16, cpu.step().unwrap());
            assert_eq!(0xbeef, cpu.memory_mut().read(0x2001, OperandSize::Word).unwrap());
        });
    }

    #[test]
    fn add_sets_flags() {
        let program = [rr(2, BYTE, A, IMM), vec![0x01]].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x7f);
            assert_eq!(7, cpu.step().unwrap());
            assert_eq!(0x80, get(cpu, R::A, OperandSize::Byte));

            let flags = cpu.registers().flags();
            assert!(flags.sign);
            assert!(!flags.zero);
            assert!(flags.half_carry);
            assert!(flags.parity_overflow);
            assert!(!flags.subtract);
            assert!(!flags.carry);
        });
    }

    #[test]
    fn dword_arithmetic_pays_surcharge() {
        do_with_program(&rr(2, DWORD, HL, BC), |cpu| {
            set(cpu, R::HL, OperandSize::DWord, 0xffff_ffff);
            set(cpu, R::BC, OperandSize::DWord, 2);
            assert_eq!(3 + 1 + 3, cpu.step().unwrap());
            assert_eq!(1, get(cpu, R::HL, OperandSize::DWord));
            assert!(cpu.registers().flag(F_CARRY));
        });
    }

    #[test]
    fn compare_and_test_leave_destination_alone() {
        let program = [
            rr(6, BYTE, A, IMM),
            vec![0x05],
            rr(10, BYTE, A, IMM),
            vec![0x02],
        ]
        .concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x05);
            cpu.step().unwrap();
            assert_eq!(0x05, get(cpu, R::A, OperandSize::Byte));
            assert!(cpu.registers().flags().zero);
            assert!(cpu.registers().flags().subtract);

            cpu.step().unwrap();
            assert_eq!(0x05, get(cpu, R::A, OperandSize::Byte));
            assert!(cpu.registers().flags().zero);
            assert!(cpu.registers().flags().half_carry);
        });
    }

    #[test]
    fn add_with_carry_uses_incoming_carry() {
        let program = [rr(3, BYTE, A, IMM), vec![0x01]].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x01);
            cpu.registers_mut().set_flag(F_CARRY, true);
            cpu.step().unwrap();
            assert_eq!(0x03, get(cpu, R::A, OperandSize::Byte));
            assert!(!cpu.registers().flag(F_CARRY));
        });
    }

    #[test]
    fn daa_adjusts_after_add() {
        let program = [rr(2, BYTE, A, IMM), vec![0x01], nullary(3, 0)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x09);
            cpu.step().unwrap();
            assert_eq!(0x0a, get(cpu, R::A, OperandSize::Byte));
            // DAA sits at BASE + 3, so its word fetch is unaligned.
            assert_eq!(7, cpu.step().unwrap());
            assert_eq!(0x10, get(cpu, R::A, OperandSize::Byte));
            assert!(cpu.registers().flags().half_carry);
        });
    }

    #[test]
    fn increment_in_memory() {
        do_with_program(&um(4, BYTE, HL), |cpu| {
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            cpu.memory_mut().load(0x2000, &[0xff]).unwrap();
            // fetch, base, read, write
            assert_eq!(3 + 1 + 3 + 3, cpu.step().unwrap());
            assert_eq!(0, cpu.memory_mut().read(0x2000, OperandSize::Byte).unwrap());
            assert!(cpu.registers().flags().zero);
        });
    }

    #[test]
    fn ldir_copies_until_bc_is_zero() {
        do_with_program(&block(1, BYTE), |cpu| {
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            set(cpu, R::DE, OperandSize::DWord, 0x3000);
            set(cpu, R::BC, OperandSize::DWord, 3);
            cpu.memory_mut().load(0x2000, &[1, 2, 3]).unwrap();

            assert_eq!(11, cpu.step().unwrap());
            assert_eq!(BASE, cpu.registers().pc());
            assert!(cpu.registers().flag(F_PARITY_OVERFLOW));
            assert_eq!(11, cpu.step().unwrap());
            assert_eq!(10, cpu.step().unwrap());
            assert_eq!(BASE + 2, cpu.registers().pc());

            assert_eq!(0, get(cpu, R::BC, OperandSize::DWord));
            assert_eq!(0x2003, get(cpu, R::HL, OperandSize::DWord));
            assert_eq!(0x3003, get(cpu, R::DE, OperandSize::DWord));
            assert!(!cpu.registers().flag(F_PARITY_OVERFLOW));
            let copied = cpu.memory_mut().read(0x3000, OperandSize::DWord).unwrap();
            assert_eq!(0x0003_0201, copied & 0x00ff_ffff);
        });
    }

    #[test]
    fn ldir_with_zero_count_wraps() {
        do_with_program(&block(1, BYTE), |cpu| {
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            set(cpu, R::DE, OperandSize::DWord, 0x3000);
            assert_eq!(11, cpu.step().unwrap());
            assert_eq!(0xffff_ffff, get(cpu, R::BC, OperandSize::DWord));
            assert_eq!(BASE, cpu.registers().pc());
        });
    }

    #[test]
    fn lddr_moves_words_downwards() {
        do_with_program(&block(3, WORD), |cpu| {
            set(cpu, R::HL, OperandSize::DWord, 0x2002);
            set(cpu, R::DE, OperandSize::DWord, 0x3002);
            set(cpu, R::BC, OperandSize::DWord, 2);
            cpu.memory_mut().load(0x2000, &[0x11, 0x22, 0x33, 0x44]).unwrap();

            cpu.step().unwrap();
            cpu.step().unwrap();
            assert_eq!(0x4433_2211, cpu.memory_mut().read(0x3000, OperandSize::DWord).unwrap());
            assert_eq!(0x1ffe, get(cpu, R::HL, OperandSize::DWord));
        });
    }

    #[test]
    fn cpir_stops_on_match() {
        do_with_program(&block(5, BYTE), |cpu| {
            set(cpu, R::A, OperandSize::Byte, 3);
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            set(cpu, R::BC, OperandSize::DWord, 10);
            cpu.registers_mut().set_flag(F_CARRY, true);
            cpu.memory_mut().load(0x2000, &[1, 2, 3, 4]).unwrap();

            assert_eq!(8, cpu.step().unwrap());
            assert_eq!(8, cpu.step().unwrap());
            assert_eq!(7, cpu.step().unwrap());
            assert_eq!(BASE + 2, cpu.registers().pc());

            let flags = cpu.registers().flags();
            assert!(flags.zero);
            assert!(flags.subtract);
            assert!(flags.parity_overflow);
            assert!(flags.carry);
            assert_eq!(7, get(cpu, R::BC, OperandSize::DWord));
            assert_eq!(0x2003, get(cpu, R::HL, OperandSize::DWord));
        });
    }

    #[test]
    fn tsir_repeats_while_no_bits_match() {
        do_with_program(&block(9, BYTE), |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x80);
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            set(cpu, R::BC, OperandSize::DWord, 10);
            cpu.memory_mut().load(0x2000, &[0x01, 0x02, 0x81]).unwrap();

            cpu.step().unwrap();
            cpu.step().unwrap();
            cpu.step().unwrap();
            assert_eq!(BASE + 2, cpu.registers().pc());
            assert!(!cpu.registers().flags().zero);
            assert_eq!(0x2003, get(cpu, R::HL, OperandSize::DWord));
        });
    }

    #[test]
    fn inir_and_otir_use_the_io_bus() {
        let program = [block(13, BYTE), block(17, BYTE)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::B, OperandSize::Word, 2);
            set(cpu, R::C, OperandSize::Word, 0x10);
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            cpu.io_mut().load(0x10, &[0xaa]).unwrap();

            // fetch, base, I/O read, memory write, repeat
            assert_eq!(3 + 1 + 4 + 3 + 1, cpu.step().unwrap());
            assert_eq!(3 + 1 + 4 + 3, cpu.step().unwrap());
            assert_eq!(0xaaaa, cpu.memory_mut().read(0x2000, OperandSize::Word).unwrap());
            assert!(cpu.registers().flags().zero);
            assert!(cpu.registers().flags().subtract);

            set(cpu, R::B, OperandSize::Word, 2);
            set(cpu, R::C, OperandSize::Word, 0x20);
            set(cpu, R::HL, OperandSize::DWord, 0x3000);
            cpu.memory_mut().load(0x3000, &[5, 6]).unwrap();
            cpu.step().unwrap();
            cpu.step().unwrap();
            assert_eq!(6, cpu.io_mut().read(0x20, OperandSize::Byte).unwrap());
            assert_eq!(BASE + 4, cpu.registers().pc());
        });
    }

    #[test]
    fn in_and_out_move_data_through_ports() {
        let program = [rm(21, false, BYTE, A, BC), rm(21, true, BYTE, B, BC)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x5a);
            set(cpu, R::BC, OperandSize::DWord, 0x30);
            cpu.registers_mut().set_flag(F_CARRY, true);

            assert_eq!(3 + 1 + 4, cpu.step().unwrap());
            assert_eq!(0x5a, cpu.io_mut().read(0x30, OperandSize::Byte).unwrap());

            cpu.step().unwrap();
            assert_eq!(0x5a, get(cpu, R::B, OperandSize::Byte));
            assert!(cpu.registers().flag(F_CARRY));
        });
    }

    #[test]
    fn push_sign_extends_and_pop_restores() {
        let program = [ur(2, WORD, A), ur(3, DWORD, HL)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Word, 0x8001);
            assert_eq!(3 + 1 + 6, cpu.step().unwrap());
            assert_eq!(STACK_TOP - 4, cpu.registers().sp());
            assert_eq!(
                0xffff_8001,
                cpu.memory_mut().read(STACK_TOP - 4, OperandSize::DWord).unwrap()
            );

            assert_eq!(3 + 1 + 6, cpu.step().unwrap());
            assert_eq!(0xffff_8001, get(cpu, R::HL, OperandSize::DWord));
            assert_eq!(STACK_TOP, cpu.registers().sp());
        });
    }

    #[test]
    fn exchanges() {
        let program = [nullary(1, 0), ur(0, WORD, H), rr(1, WORD, D, E), ur(1, WORD, A)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::BC, OperandSize::DWord, 1);
            set(cpu, R::BCAlt, OperandSize::DWord, 2);
            cpu.step().unwrap();
            assert_eq!(2, get(cpu, R::BC, OperandSize::DWord));
            assert_eq!(1, get(cpu, R::BCAlt, OperandSize::DWord));

            set(cpu, R::H, OperandSize::Word, 0x1111);
            set(cpu, R::HAlt, OperandSize::Word, 0x2222);
            cpu.step().unwrap();
            assert_eq!(0x2222, get(cpu, R::H, OperandSize::Word));
            assert_eq!(0x1111, get(cpu, R::HAlt, OperandSize::Word));

            set(cpu, R::DE, OperandSize::DWord, 0x0001_0002);
            cpu.step().unwrap();
            assert_eq!(0x0002_0001, get(cpu, R::DE, OperandSize::DWord));

            set(cpu, R::A, OperandSize::Word, 0x12ab);
            cpu.step().unwrap();
            assert_eq!(0xab12, get(cpu, R::A, OperandSize::Word));
        });
    }

    #[test]
    fn relative_jump_costs_extra_only_when_taken() {
        let program = [br(1, 0, IMM), vec![0x10]].concat();
        do_with_program(&program, |cpu| {
            cpu.registers_mut().set_flag(F_ZERO, true);
            assert_eq!(6, cpu.step().unwrap());
            assert_eq!(BASE + 3, cpu.registers().pc());
        });
        do_with_program(&program, |cpu| {
            assert_eq!(8, cpu.step().unwrap());
            assert_eq!(BASE + 3 + 0x10, cpu.registers().pc());
        });
    }

    #[test]
    fn jump_through_register() {
        do_with_program(&br(0, UNCONDITIONAL, HL), |cpu| {
            set(cpu, R::HL, OperandSize::DWord, 0x4000);
            assert_eq!(3 + 2, cpu.step().unwrap());
            assert_eq!(0x4000, cpu.registers().pc());
        });
    }

    #[test]
    fn call_and_return() {
        let program = [br(3, UNCONDITIONAL, IMM), dword(0x200)].concat();
        do_with_program(&program, |cpu| {
            cpu.memory_mut().load(0x200, &br(6, UNCONDITIONAL, 0)).unwrap();

            // 9 fetch, 2 taken, 6 push
            assert_eq!(17, cpu.step().unwrap());
            assert_eq!(0x200, cpu.registers().pc());
            assert_eq!(
                BASE + 6,
                cpu.memory_mut().read(STACK_TOP - 4, OperandSize::DWord).unwrap()
            );

            assert_eq!(3 + 2 + 6, cpu.step().unwrap());
            assert_eq!(BASE + 6, cpu.registers().pc());
            assert_eq!(STACK_TOP, cpu.registers().sp());
        });
    }

    #[test]
    fn conditional_return_not_taken() {
        do_with_program(&br(6, 3, 0), |cpu| {
            assert_eq!(3, cpu.step().unwrap());
            assert_eq!(BASE + 2, cpu.registers().pc());
            assert_eq!(STACK_TOP, cpu.registers().sp());
        });
    }

    #[test]
    fn restart_pushes_and_jumps() {
        let program = [nullary(2, 0), vec![0x38]].concat();
        do_with_program(&program, |cpu| {
            assert_eq!(6 + 2 + 6, cpu.step().unwrap());
            assert_eq!(0x38, cpu.registers().pc());
            assert_eq!(
                BASE + 3,
                cpu.memory_mut().read(STACK_TOP - 4, OperandSize::DWord).unwrap()
            );
        });
    }

    #[test]
    fn janz_tests_the_accumulator_word() {
        let program = [single(2, 4), single(2, 4)].concat();
        do_with_program(&program, |cpu| {
            assert_eq!(3, cpu.step().unwrap());
            assert_eq!(BASE + 2, cpu.registers().pc());

            set(cpu, R::A, OperandSize::Word, 0x0100);
            assert_eq!(3 + 2, cpu.step().unwrap());
            assert_eq!(BASE + 4 + 4, cpu.registers().pc());
        });
    }

    #[test]
    fn divide() {
        let program = [ur(9, WORD, A), ur(9, WORD, B)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Word, 0x0702);
            cpu.registers_mut().set_flag(F_CARRY, true);
            cpu.step().unwrap();
            assert_eq!(0x0103, get(cpu, R::A, OperandSize::Word));
            let flags = cpu.registers().flags();
            assert!(!flags.zero);
            assert!(!flags.carry);
            assert!(!flags.parity_overflow);

            set(cpu, R::B, OperandSize::Word, 0x0500);
            // 3 fetch, 1 base, 8 + 2 in the divider
            assert_eq!(14, cpu.step().unwrap());
            assert_eq!(0x0500, get(cpu, R::B, OperandSize::Word));
            assert!(cpu.registers().flag(F_PARITY_OVERFLOW));
        });
    }

    #[test]
    fn signed_divide_and_multiply() {
        let program = [ur(10, WORD, A), ur(8, WORD, B)].concat();
        do_with_program(&program, |cpu| {
            // -7 / 2
            set(cpu, R::A, OperandSize::Word, 0xf902);
            cpu.step().unwrap();
            assert_eq!(0xfffd, get(cpu, R::A, OperandSize::Word));
            assert!(cpu.registers().flags().sign);

            set(cpu, R::B, OperandSize::Word, 0x0c0b);
            cpu.step().unwrap();
            assert_eq!(132, get(cpu, R::B, OperandSize::Word));
        });
    }

    #[test]
    fn shift_pays_per_bit() {
        let program = [rr(18, BYTE, A, IMM), vec![3]].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x21);
            assert_eq!(6 + 1 + 3, cpu.step().unwrap());
            assert_eq!(0x08, get(cpu, R::A, OperandSize::Byte));
            assert!(cpu.registers().flag(F_CARRY));
        });
    }

    #[test]
    fn shift_by_full_width_empties_the_operand() {
        let program = [rr(18, BYTE, A, IMM), vec![8]].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x01);
            assert_eq!(6 + 1 + 8, cpu.step().unwrap());
            assert_eq!(0x00, get(cpu, R::A, OperandSize::Byte));
            assert!(cpu.registers().flag(F_CARRY));
            assert!(cpu.registers().flag(F_ZERO));
        });
    }

    #[test]
    fn bit_set_and_reset() {
        let program = [
            rr(11, BYTE, A, IMM),
            vec![7],
            rr(12, BYTE, A, IMM),
            vec![0],
            rr(13, BYTE, A, IMM),
            vec![7],
        ]
        .concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x80);
            cpu.registers_mut().set_flag(F_CARRY, true);
            cpu.step().unwrap();
            assert!(!cpu.registers().flags().zero);
            assert!(cpu.registers().flag(F_CARRY));

            cpu.step().unwrap();
            assert_eq!(0x81, get(cpu, R::A, OperandSize::Byte));
            cpu.step().unwrap();
            assert_eq!(0x01, get(cpu, R::A, OperandSize::Byte));
        });
    }

    #[test]
    fn rotate_digits() {
        let program = [nullary(3, 1), nullary(3, 2)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::A, OperandSize::Byte, 0x12);
            set(cpu, R::HL, OperandSize::DWord, 0x2000);
            cpu.memory_mut().load(0x2000, &[0x34]).unwrap();

            cpu.step().unwrap();
            assert_eq!(0x13, get(cpu, R::A, OperandSize::Byte));
            assert_eq!(0x42, cpu.memory_mut().read(0x2000, OperandSize::Byte).unwrap());

            cpu.step().unwrap();
            assert_eq!(0x12, get(cpu, R::A, OperandSize::Byte));
            assert_eq!(0x34, cpu.memory_mut().read(0x2000, OperandSize::Byte).unwrap());
        });
    }

    #[test]
    fn carry_flag_operations() {
        let program = [nullary(4, 5), nullary(4, 4)].concat();
        do_with_program(&program, |cpu| {
            cpu.step().unwrap();
            assert!(cpu.registers().flag(F_CARRY));
            cpu.step().unwrap();
            assert!(!cpu.registers().flag(F_CARRY));
            assert!(cpu.registers().flag(F_HALF_CARRY));
        });
    }

    #[test]
    fn load_a_from_r_reports_iff2() {
        let program = [nullary(4, 0), nullary(4, 8)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::R, OperandSize::Word, 0x80);
            cpu.step().unwrap();
            cpu.step().unwrap();
            assert_eq!(0x80, get(cpu, R::A, OperandSize::Word));
            assert!(cpu.registers().flag(F_PARITY_OVERFLOW));
            assert!(!cpu.registers().flags().sign);
        });
    }

    #[test]
    fn non_maskable_interrupt_and_retn() {
        do_with_program(&single(0, 0), |cpu| {
            cpu.memory_mut().load(NMI_VECTOR, &br(8, UNCONDITIONAL, 0)).unwrap();
            cpu.registers_mut().set_flag(F_ENABLE_INTERRUPTS, true);
            cpu.raise_nmi();

            assert_eq!(2 + 6, cpu.step().unwrap());
            assert_eq!(NMI_VECTOR, cpu.registers().pc());
            assert!(!cpu.registers().iff1());
            assert!(cpu.registers().iff2());

            cpu.step().unwrap();
            assert_eq!(BASE, cpu.registers().pc());
            assert!(cpu.registers().iff1());
        });
    }

    #[test]
    fn mode_1_interrupt() {
        do_with_program(&nullary(4, 0), |cpu| {
            cpu.step().unwrap();
            cpu.raise_irq(0x10);
            assert_eq!(2 + 6, cpu.step().unwrap());
            assert_eq!(IM1_VECTOR, cpu.registers().pc());
            assert!(!cpu.registers().iff1());
            assert_eq!(
                BASE + 2,
                cpu.memory_mut().read(STACK_TOP - 4, OperandSize::DWord).unwrap()
            );
        });
    }

    #[test]
    fn mode_2_interrupt_reads_vector_table() {
        let program = [nullary(4, 3), nullary(4, 0)].concat();
        do_with_program(&program, |cpu| {
            set(cpu, R::I, OperandSize::DWord, 0x4000);
            cpu.memory_mut().load(0x4008, &dword(0x1234)).unwrap();
            cpu.step().unwrap();
            cpu.step().unwrap();
            assert_eq!(InterruptMode::Mode2, cpu.interrupt_mode());

            cpu.raise_irq(2);
            assert_eq!(2 + 6 + 6, cpu.step().unwrap());
            assert_eq!(0x1234, cpu.registers().pc());
        });
    }

    #[test]
    fn halt_spins_until_interrupted() {
        do_with_program(&nullary(2, 1), |cpu| {
            assert_eq!(4, cpu.step().unwrap());
            assert!(cpu.is_halted());
            assert_eq!(4, cpu.step().unwrap());
            assert_eq!(BASE + 2, cpu.registers().pc());

            cpu.raise_nmi();
            cpu.step().unwrap();
            assert!(!cpu.is_halted());
            assert_eq!(NMI_VECTOR, cpu.registers().pc());
            assert_eq!(
                BASE + 2,
                cpu.memory_mut().read(STACK_TOP - 4, OperandSize::DWord).unwrap()
            );
        });
    }

    #[test]
    fn rejects_wrong_operand_count() {
        let mut cpu = new_cpu();
        let form =
            Form::new(Operation::Ld, OperandSize::Byte).with_operand1(Operand::register(R::A));
        let op = DecodedOperation::new(BASE, vec![0, 0], form, 3);
        assert_eq!(
            Err(CpuError::Contract(ContractViolation::Arity {
                operation: Operation::Ld,
                expected: 2
            })),
            cpu.execute(op)
        );
    }

    #[test]
    fn rejects_write_to_immediate() {
        let mut cpu = new_cpu();
        let form =
            Form::new(Operation::Inc, OperandSize::Byte).with_operand1(Operand::immediate(1));
        let op = DecodedOperation::synthetic(BASE, form);
        assert_eq!(
            Err(CpuError::Contract(ContractViolation::ImmediateWriteback {
                operation: Operation::Inc
            })),
            cpu.execute(op)
        );
    }

    #[test]
    fn rejects_bad_operand_kinds() {
        let mut cpu = new_cpu();

        let form =
            Form::new(Operation::ExAlt, OperandSize::Byte).with_operand1(Operand::register(R::A));
        assert_eq!(
            Err(CpuError::Contract(ContractViolation::UnsupportedSize {
                operation: Operation::ExAlt,
                size: OperandSize::Byte
            })),
            cpu.execute(DecodedOperation::synthetic(BASE, form))
        );

        let form = Form::new(Operation::ExAlt, OperandSize::Word)
            .with_operand1(Operand::indirect_register(R::HL, None));
        assert_eq!(
            Err(CpuError::Contract(ContractViolation::RegisterRequired {
                operation: Operation::ExAlt
            })),
            cpu.execute(DecodedOperation::synthetic(BASE, form))
        );

        let form = Form::new(Operation::In, OperandSize::Byte)
            .with_operand1(Operand::register(R::A))
            .with_operand2(Operand::register(R::C));
        assert_eq!(
            Err(CpuError::Contract(ContractViolation::MemoryRequired {
                operation: Operation::In
            })),
            cpu.execute(DecodedOperation::synthetic(BASE, form))
        );
    }

    proptest! {
        // PUSH then POP of the same pair is invisible apart from PC.
        #[test]
        fn push_pop_round_trips_any_dword(
            which in 0u16..6,
            values in proptest::array::uniform6(any::<u32>()),
        ) {
            let program = [ur(2, DWORD, which), ur(3, DWORD, which)].concat();
            do_with_program(&program, |cpu| {
                let pairs = [R::AF, R::BC, R::DE, R::HL, R::IX, R::IY];
                for (pair, value) in pairs.iter().zip(values.iter()) {
                    set(cpu, *pair, OperandSize::DWord, *value);
                }
                let mut expected = cpu.registers().clone();
                expected.set_pc(BASE + 4);

                cpu.step().unwrap();
                cpu.step().unwrap();
                assert_eq!(&expected, cpu.registers());
            });
        }
    }
}
