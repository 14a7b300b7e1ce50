//! Instruction decoder.
//!
//! Every instruction starts with a little-endian 16-bit word whose low
//! two bits select one of four groups:
//!
//! ```text
//!   00  register-register     [src:3][dst:3][size:2][op:6]      00
//!   01  register-memory       [addr:3][reg:3][size:2][load:1][op:5] 01
//!   10  unary register        (subgroup 00 in bits 2-3)
//!       unary memory          (subgroup 01)
//!       branch                (subgroup 10)
//!       nullary               (subgroup 11)
//!   11  single-byte           (subgroup 11 only)
//! ```
//!
//! Displacements for IX, IY and SP based memory operands come straight
//! after the opcode word, followed by any direct address and finally any
//! immediate.

use crate::bus::Bus;
use crate::config::Timing;
use crate::err::{BusError, CpuError, EncodingError, Field, Format};
use crate::instr::{Condition, DecodedOperation, Form, Operand, OperandSize, Operation};
use crate::registers::RegisterTarget;

const IMMEDIATE_CODE: u16 = 0b111;

/// Pulls instruction bytes off the bus, remembering every byte and the
/// cycles each fetch cost.
struct Fetcher<'a, B: Bus + ?Sized> {
    bus: &'a mut B,
    timing: &'a Timing,
    base: u32,
    bytes: Vec<u8>,
    cycles: u32,
}

impl<'a, B: Bus + ?Sized> Fetcher<'a, B> {
    fn new(bus: &'a mut B, timing: &'a Timing, base: u32) -> Self {
        Fetcher {
            bus,
            timing,
            base,
            bytes: Vec::with_capacity(8),
            cycles: 0,
        }
    }

    fn fetch(&mut self, size: OperandSize) -> Result<u32, BusError> {
        let address = self.base.wrapping_add(self.bytes.len() as u32);
        let mut buf = [0u8; 4];
        self.bus.read_bytes(address, &mut buf[..size.bytes()])?;
        self.bytes.extend_from_slice(&buf[..size.bytes()]);
        self.cycles += self.timing.memory_cycles(address, size);
        Ok(u32::from_le_bytes(buf))
    }

    fn fetch_displacement(&mut self) -> Result<i16, BusError> {
        Ok(self.fetch(OperandSize::Word)? as u16 as i16)
    }

    fn finish(self, form: Form) -> DecodedOperation {
        DecodedOperation::new(self.base, self.bytes, form, self.cycles)
    }
}

fn field(word: u16, lsb: u32, len: u32) -> u16 {
    (word >> lsb) & ((1 << len) - 1)
}

fn unassigned(format: Format, field: Field, value: u16) -> EncodingError {
    EncodingError::UnassignedSelector {
        format,
        field,
        value,
    }
}

fn illegal(format: Format, field: Field) -> EncodingError {
    EncodingError::IllegalRegisterCode { format, field }
}

/// Register named by a three-bit code at the given operand size.
fn data_register(code: u16, size: OperandSize) -> Option<RegisterTarget> {
    use RegisterTarget::*;
    let target = match (size, code) {
        (OperandSize::DWord, _) => return address_register(code),
        (_, 0) => A,
        (_, 1) => B,
        (_, 2) => C,
        (_, 3) => D,
        (_, 4) => E,
        (_, 5) => H,
        (_, 6) => L,
        _ => return None,
    };
    Some(target)
}

/// Register used to form a memory address. Always a 32-bit pair.
fn address_register(code: u16) -> Option<RegisterTarget> {
    use RegisterTarget::*;
    let target = match code {
        0 => AF,
        1 => BC,
        2 => DE,
        3 => HL,
        4 => IX,
        5 => IY,
        6 => SP,
        _ => return None,
    };
    Some(target)
}

fn takes_displacement(target: RegisterTarget) -> bool {
    matches!(
        target,
        RegisterTarget::IX | RegisterTarget::IY | RegisterTarget::SP
    )
}

fn decode_size(word: u16, format: Format) -> Result<OperandSize, EncodingError> {
    let code = field(word, 8, 2);
    OperandSize::from_code(code).ok_or_else(|| unassigned(format, Field::Size, code))
}

fn memory_operand<B: Bus + ?Sized>(f: &mut Fetcher<B>, code: u16) -> Result<Operand, BusError> {
    match address_register(code) {
        Some(target) => {
            let displacement = if takes_displacement(target) {
                Some(f.fetch_displacement()?)
            } else {
                None
            };
            Ok(Operand::indirect_register(target, displacement))
        }
        None => Ok(Operand::indirect_immediate(f.fetch(OperandSize::DWord)?)),
    }
}

fn register_or_immediate<B: Bus + ?Sized>(
    f: &mut Fetcher<B>,
    code: u16,
    size: OperandSize,
) -> Result<Operand, BusError> {
    match data_register(code, size) {
        Some(target) => Ok(Operand::register(target)),
        None => Ok(Operand::immediate(f.fetch(size)?)),
    }
}

/// Selector shared by the register-register and register-memory formats.
fn binary_operation(code: u16) -> Option<Operation> {
    use Operation::*;
    let operation = match code {
        0 => Ld,
        1 => Ex,
        2 => Add,
        3 => Adc,
        4 => Sub,
        5 => Sbc,
        6 => Cp,
        7 => And,
        8 => Or,
        9 => Xor,
        10 => Tst,
        11 => Bit,
        12 => Set,
        13 => Res,
        14 => Rlc,
        15 => Rrc,
        16 => Rl,
        17 => Rr,
        18 => Sla,
        19 => Sra,
        20 => Srl,
        _ => return None,
    };
    Some(operation)
}

fn unary_operation(code: u16) -> Option<Operation> {
    use Operation::*;
    let operation = match code {
        0 => ExAlt,
        1 => Exh,
        2 => Push,
        3 => Pop,
        4 => Inc,
        5 => Dec,
        6 => Neg,
        7 => Ext,
        8 => Mlt,
        9 => Div,
        10 => Sdiv,
        11 => Cpl,
        _ => return None,
    };
    Some(operation)
}

fn branch_operation(code: u16) -> Option<Operation> {
    use Operation::*;
    let operation = match code {
        0 => Jp,
        1 => JrS8,
        2 => Jr,
        3 => Call,
        4 => CallrS8,
        5 => Callr,
        6 => Ret,
        7 => Reti,
        8 => Retn,
        _ => return None,
    };
    Some(operation)
}

fn block_operation(code: u16) -> Option<Operation> {
    use Operation::*;
    let operation = match code {
        0 => Ldi,
        1 => Ldir,
        2 => Ldd,
        3 => Lddr,
        4 => Cpi,
        5 => Cpir,
        6 => Cpd,
        7 => Cpdr,
        8 => Tsi,
        9 => Tsir,
        10 => Tsd,
        11 => Tsdr,
        12 => Ini,
        13 => Inir,
        14 => Ind,
        15 => Indr,
        16 => Outi,
        17 => Otir,
        18 => Outd,
        19 => Otdr,
        _ => return None,
    };
    Some(operation)
}

fn register_register<B: Bus + ?Sized>(f: &mut Fetcher<B>, word: u16) -> Result<Form, CpuError> {
    const FORMAT: Format = Format::RegisterRegister;

    let code = field(word, 2, 6);
    let operation =
        binary_operation(code).ok_or_else(|| unassigned(FORMAT, Field::Operation, code))?;
    let size = decode_size(word, FORMAT)?;

    let dst = field(word, 10, 3);
    let destination = data_register(dst, size).ok_or_else(|| illegal(FORMAT, Field::Destination))?;

    let src = field(word, 13, 3);
    if src == IMMEDIATE_CODE && operation == Operation::Ex {
        return Err(illegal(FORMAT, Field::Source).into());
    }
    let source = register_or_immediate(f, src, size)?;

    Ok(Form::new(operation, size)
        .sized()
        .with_operand1(Operand::register(destination))
        .with_operand2(source))
}

fn register_memory<B: Bus + ?Sized>(f: &mut Fetcher<B>, word: u16) -> Result<Form, CpuError> {
    const FORMAT: Format = Format::RegisterMemory;

    let code = field(word, 2, 5);
    let load = field(word, 7, 1) == 1;
    let operation = match code {
        21 if load => Operation::In,
        21 => Operation::Out,
        _ => binary_operation(code)
            .ok_or_else(|| unassigned(FORMAT, Field::Operation, code))?,
    };
    let size = decode_size(word, FORMAT)?;
    let reg = field(word, 10, 3);
    let addr = field(word, 13, 3);

    if reg == IMMEDIATE_CODE && (load || operation == Operation::Ex) {
        return Err(illegal(FORMAT, Field::Register).into());
    }

    let memory = memory_operand(f, addr)?;
    let register = register_or_immediate(f, reg, size)?;

    let form = Form::new(operation, size).sized();
    if load {
        Ok(form.with_operand1(register).with_operand2(memory))
    } else {
        Ok(form.with_operand1(memory).with_operand2(register))
    }
}

fn unary_selector(word: u16) -> u16 {
    field(word, 4, 4) | (field(word, 13, 3) << 4)
}

fn unary_register(word: u16) -> Result<Form, CpuError> {
    const FORMAT: Format = Format::UnaryRegister;

    let code = unary_selector(word);
    let operation =
        unary_operation(code).ok_or_else(|| unassigned(FORMAT, Field::Operation, code))?;
    let size = decode_size(word, FORMAT)?;
    if operation == Operation::ExAlt && size == OperandSize::Byte {
        return Err(unassigned(FORMAT, Field::Size, field(word, 8, 2)).into());
    }

    let reg = field(word, 10, 3);
    let target = data_register(reg, size).ok_or_else(|| illegal(FORMAT, Field::Register))?;

    Ok(Form::new(operation, size)
        .sized()
        .with_operand1(Operand::register(target)))
}

fn unary_memory<B: Bus + ?Sized>(f: &mut Fetcher<B>, word: u16) -> Result<Form, CpuError> {
    const FORMAT: Format = Format::UnaryMemory;

    let code = unary_selector(word);
    let operation = match unary_operation(code) {
        Some(Operation::ExAlt) | None => {
            return Err(unassigned(FORMAT, Field::Operation, code).into())
        }
        Some(operation) => operation,
    };
    let size = decode_size(word, FORMAT)?;
    let memory = memory_operand(f, field(word, 10, 3))?;

    Ok(Form::new(operation, size).sized().with_operand1(memory))
}

fn branch<B: Bus + ?Sized>(f: &mut Fetcher<B>, word: u16) -> Result<Form, CpuError> {
    const FORMAT: Format = Format::Branch;

    let code = field(word, 4, 5);
    let operation =
        branch_operation(code).ok_or_else(|| unassigned(FORMAT, Field::Operation, code))?;
    let cond = field(word, 9, 4);
    let condition =
        Condition::from_code(cond).ok_or_else(|| unassigned(FORMAT, Field::Condition, cond))?;
    let target = field(word, 13, 3);

    let size = match operation {
        Operation::Ret | Operation::Reti | Operation::Retn => {
            if target != 0 {
                return Err(unassigned(FORMAT, Field::Target, target).into());
            }
            return Ok(Form::new(operation, OperandSize::DWord).with_condition(condition));
        }
        Operation::JrS8 | Operation::CallrS8 => OperandSize::Byte,
        Operation::Jr | Operation::Callr => OperandSize::Word,
        _ => OperandSize::DWord,
    };

    let operand = register_or_immediate(f, target, size)?;
    Ok(Form::new(operation, size)
        .with_condition(condition)
        .with_operand1(operand))
}

fn nullary<B: Bus + ?Sized>(f: &mut Fetcher<B>, word: u16) -> Result<Form, CpuError> {
    use Operation::*;
    use RegisterTarget as R;
    const FORMAT: Format = Format::Nullary;

    let family = field(word, 4, 4);
    let selector = field(word, 8, 8);
    let unknown = || unassigned(FORMAT, Field::Operation, selector);

    let form = match family {
        0 => {
            let code = field(word, 10, 6);
            let operation = block_operation(code)
                .ok_or_else(|| unassigned(FORMAT, Field::Operation, code))?;
            Form::new(operation, decode_size(word, FORMAT)?).sized()
        }
        1 => match selector {
            0 => Form::new(Exx, OperandSize::DWord),
            1 => Form::new(Exi, OperandSize::DWord),
            _ => return Err(unknown().into()),
        },
        2 => match selector {
            0 => {
                let vector = f.fetch(OperandSize::Byte)?;
                Form::new(Rst, OperandSize::Byte).with_operand1(Operand::immediate(vector))
            }
            1 => Form::new(Halt, OperandSize::Byte),
            _ => return Err(unknown().into()),
        },
        3 => match selector {
            0 => Form::new(Daa, OperandSize::Byte),
            1 => Form::new(Rld, OperandSize::Byte),
            2 => Form::new(Rrd, OperandSize::Byte),
            _ => return Err(unknown().into()),
        },
        4 => match selector {
            0 => Form::new(Ei, OperandSize::Byte),
            1 => Form::new(Di, OperandSize::Byte),
            2 => Form::new(Im1, OperandSize::Byte),
            3 => Form::new(Im2, OperandSize::Byte),
            4 => Form::new(Ccf, OperandSize::Byte),
            5 => Form::new(Scf, OperandSize::Byte),
            6 => {
                let value = f.fetch(OperandSize::DWord)?;
                Form::new(LdINn, OperandSize::DWord)
                    .with_operand1(Operand::register(R::I))
                    .with_operand2(Operand::immediate(value))
            }
            7 => Form::new(LdRA, OperandSize::Word)
                .with_operand1(Operand::register(R::R))
                .with_operand2(Operand::register(R::A)),
            8 => Form::new(LdAR, OperandSize::Word)
                .with_operand1(Operand::register(R::A))
                .with_operand2(Operand::register(R::R)),
            _ => return Err(unknown().into()),
        },
        _ => return Err(unassigned(FORMAT, Field::Family, family).into()),
    };
    Ok(form)
}

fn single_byte(word: u16) -> Result<Form, CpuError> {
    const FORMAT: Format = Format::SingleByte;

    let subgroup = field(word, 2, 2);
    if subgroup != 0b11 {
        return Err(unassigned(FORMAT, Field::Subgroup, subgroup).into());
    }

    let displacement = field(word, 4, 8);
    let code = field(word, 12, 4);
    let operation = match code {
        0 if displacement != 0 => {
            return Err(unassigned(FORMAT, Field::Displacement, displacement).into())
        }
        0 => return Ok(Form::new(Operation::Nop, OperandSize::Byte)),
        1 => Operation::Djnz,
        2 => Operation::Janz,
        _ => return Err(unassigned(FORMAT, Field::Operation, code).into()),
    };

    let displacement = Operand::immediate(u32::from(displacement));
    Ok(Form::new(operation, OperandSize::Byte).with_operand1(displacement))
}

/// Decode the instruction at `address`. Reads only; touches no CPU state.
pub fn decode<B: Bus + ?Sized>(
    bus: &mut B,
    timing: &Timing,
    address: u32,
) -> Result<DecodedOperation, CpuError> {
    let mut f = Fetcher::new(bus, timing, address);
    let word = f.fetch(OperandSize::Word)? as u16;

    let form = match word & 0b11 {
        0b00 => register_register(&mut f, word)?,
        0b01 => register_memory(&mut f, word)?,
        0b10 => match field(word, 2, 2) {
            0b00 => unary_register(word)?,
            0b01 => unary_memory(&mut f, word)?,
            0b10 => branch(&mut f, word)?,
            _ => nullary(&mut f, word)?,
        },
        _ => single_byte(word)?,
    };

    Ok(f.finish(form))
}
