//! The decoded-instruction data model.

use crate::registers::{FlagState, RegisterTarget};
use crate::utils::as_signed;

use std::fmt;

/// Width of an operand, in bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OperandSize {
    Byte = 1,
    Word = 2,
    DWord = 4,
}

impl OperandSize {
    pub fn bytes(self) -> usize {
        self as usize
    }

    pub fn bits(self) -> u32 {
        (self as u32) * 8
    }

    pub fn mask(self) -> u32 {
        match self {
            OperandSize::Byte => 0xff,
            OperandSize::Word => 0xffff,
            OperandSize::DWord => 0xffff_ffff,
        }
    }

    pub fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    /// Decode the two-bit size field used by every sized format.
    pub fn from_code(code: u16) -> Option<OperandSize> {
        match code {
            0b00 => Some(OperandSize::Byte),
            0b01 => Some(OperandSize::Word),
            0b10 => Some(OperandSize::DWord),
            _ => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            OperandSize::Byte => "B",
            OperandSize::Word => "W",
            OperandSize::DWord => "D",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandBase {
    Register(RegisterTarget),
    Immediate(u32),
}

/// A register or immediate, optionally used as a memory address.
///
/// When `indirect` is set the operand names the memory cell at
/// `base + displacement` rather than the base value itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Operand {
    pub base: OperandBase,
    pub indirect: bool,
    pub displacement: Option<i16>,
}

impl Operand {
    pub fn register(target: RegisterTarget) -> Operand {
        Operand {
            base: OperandBase::Register(target),
            indirect: false,
            displacement: None,
        }
    }

    pub fn immediate(value: u32) -> Operand {
        Operand {
            base: OperandBase::Immediate(value),
            indirect: false,
            displacement: None,
        }
    }

    pub fn indirect_register(target: RegisterTarget, displacement: Option<i16>) -> Operand {
        Operand {
            base: OperandBase::Register(target),
            indirect: true,
            displacement,
        }
    }

    pub fn indirect_immediate(address: u32) -> Operand {
        Operand {
            base: OperandBase::Immediate(address),
            indirect: true,
            displacement: None,
        }
    }

    pub fn target(&self) -> Option<RegisterTarget> {
        match self.base {
            OperandBase::Register(t) => Some(t),
            OperandBase::Immediate(_) => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        !self.indirect && self.target().is_none()
    }

    /// Render this operand with immediates shown as signed decimal.
    fn render_signed(&self, size: OperandSize) -> String {
        match self.base {
            OperandBase::Immediate(v) if !self.indirect => format!("{}", as_signed(v, size)),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let base = match self.base {
            OperandBase::Register(t) => t.name().to_owned(),
            OperandBase::Immediate(v) => format!("{:#x}", v),
        };
        if !self.indirect {
            return f.write_str(&base);
        }
        match self.displacement {
            Some(d) if d < 0 => write!(f, "({} - {})", base, -i32::from(d)),
            Some(d) => write!(f, "({} + {})", base, d),
            None => write!(f, "({})", base),
        }
    }
}

/// Branch condition codes, in encoding order.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Condition {
    NZ,
    Z,
    NC,
    C,
    PO,
    PE,
    P,
    M,
    Unconditional,
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Unconditional
    }
}

impl Condition {
    pub fn from_code(code: u16) -> Option<Condition> {
        let cond = match code {
            0 => Condition::NZ,
            1 => Condition::Z,
            2 => Condition::NC,
            3 => Condition::C,
            4 => Condition::PO,
            5 => Condition::PE,
            6 => Condition::P,
            7 => Condition::M,
            8 => Condition::Unconditional,
            _ => return None,
        };
        Some(cond)
    }

    pub fn holds(self, flags: &FlagState) -> bool {
        match self {
            Condition::NZ => !flags.zero,
            Condition::Z => flags.zero,
            Condition::NC => !flags.carry,
            Condition::C => flags.carry,
            Condition::PO => !flags.parity_overflow,
            Condition::PE => flags.parity_overflow,
            Condition::P => !flags.sign,
            Condition::M => flags.sign,
            Condition::Unconditional => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Condition::NZ => "NZ",
            Condition::Z => "Z",
            Condition::NC => "NC",
            Condition::C => "C",
            Condition::PO => "PO",
            Condition::PE => "PE",
            Condition::P => "P",
            Condition::M => "M",
            Condition::Unconditional => "",
        }
    }
}

/// Every operation the execution engine understands, including the
/// synthetic ones produced for interrupts and the halted state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    Interrupt,
    NonMaskableInterrupt,
    HaltState,
    Ld,
    Ex,
    ExAlt,
    Exx,
    Exi,
    Exh,
    Push,
    Pop,
    In,
    Out,
    Ldi,
    Ldir,
    Ldd,
    Lddr,
    Cpi,
    Cpir,
    Cpd,
    Cpdr,
    Tsi,
    Tsir,
    Tsd,
    Tsdr,
    Ini,
    Inir,
    Ind,
    Indr,
    Outi,
    Otir,
    Outd,
    Otdr,
    Add,
    Adc,
    Sub,
    Sbc,
    Cp,
    Inc,
    Dec,
    Daa,
    Neg,
    Ext,
    Mlt,
    Div,
    Sdiv,
    And,
    Or,
    Xor,
    Tst,
    Cpl,
    Bit,
    Set,
    Res,
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Srl,
    Rld,
    Rrd,
    Nop,
    Jp,
    JrS8,
    Jr,
    Call,
    CallrS8,
    Callr,
    Ret,
    Reti,
    Retn,
    Djnz,
    Janz,
    Rst,
    Ccf,
    Scf,
    Ei,
    Di,
    Im1,
    Im2,
    Halt,
    LdINn,
    LdRA,
    LdAR,
}

impl Operation {
    pub fn mnemonic(self) -> &'static str {
        use Operation::*;
        match self {
            Interrupt => "INT",
            NonMaskableInterrupt => "NMI",
            HaltState => "(halted)",
            Ld => "LD",
            Ex => "EX",
            ExAlt => "EXA",
            Exx => "EXX",
            Exi => "EXI",
            Exh => "EXH",
            Push => "PUSH",
            Pop => "POP",
            In => "IN",
            Out => "OUT",
            Ldi => "LDI",
            Ldir => "LDIR",
            Ldd => "LDD",
            Lddr => "LDDR",
            Cpi => "CPI",
            Cpir => "CPIR",
            Cpd => "CPD",
            Cpdr => "CPDR",
            Tsi => "TSI",
            Tsir => "TSIR",
            Tsd => "TSD",
            Tsdr => "TSDR",
            Ini => "INI",
            Inir => "INIR",
            Ind => "IND",
            Indr => "INDR",
            Outi => "OUTI",
            Otir => "OTIR",
            Outd => "OUTD",
            Otdr => "OTDR",
            Add => "ADD",
            Adc => "ADC",
            Sub => "SUB",
            Sbc => "SBC",
            Cp => "CP",
            Inc => "INC",
            Dec => "DEC",
            Daa => "DAA",
            Neg => "NEG",
            Ext => "EXT",
            Mlt => "MLT",
            Div => "DIV",
            Sdiv => "SDIV",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Tst => "TST",
            Cpl => "CPL",
            Bit => "BIT",
            Set => "SET",
            Res => "RES",
            Rlc => "RLC",
            Rrc => "RRC",
            Rl => "RL",
            Rr => "RR",
            Sla => "SLA",
            Sra => "SRA",
            Srl => "SRL",
            Rld => "RLD",
            Rrd => "RRD",
            Nop => "NOP",
            Jp => "JP",
            JrS8 => "JR",
            Jr => "JR",
            Call => "CALL",
            CallrS8 => "CALLR",
            Callr => "CALLR",
            Ret => "RET",
            Reti => "RETI",
            Retn => "RETN",
            Djnz => "DJNZ",
            Janz => "JANZ",
            Rst => "RST",
            Ccf => "CCF",
            Scf => "SCF",
            Ei => "EI",
            Di => "DI",
            Im1 => "IM 1",
            Im2 => "IM 2",
            Halt => "HALT",
            LdINn => "LD",
            LdRA => "LD",
            LdAR => "LD",
        }
    }

    /// Operations whose target is a signed offset from the next instruction.
    pub fn is_relative(self) -> bool {
        use Operation::*;
        matches!(self, JrS8 | Jr | CallrS8 | Callr | Djnz | Janz)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The shape of an instruction as worked out by the decoder, before it
/// is frozen together with the bytes it was decoded from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Form {
    pub operation: Operation,
    pub size: OperandSize,
    pub operand1: Option<Operand>,
    pub operand2: Option<Operand>,
    pub condition: Condition,
    /// Whether the size came from the encoding and belongs in the listing.
    pub sized: bool,
}

impl Form {
    pub fn new(operation: Operation, size: OperandSize) -> Form {
        Form {
            operation,
            size,
            operand1: None,
            operand2: None,
            condition: Condition::Unconditional,
            sized: false,
        }
    }

    pub fn sized(mut self) -> Form {
        self.sized = true;
        self
    }

    pub fn with_operand1(mut self, operand: Operand) -> Form {
        self.operand1 = Some(operand);
        self
    }

    pub fn with_operand2(mut self, operand: Operand) -> Form {
        self.operand2 = Some(operand);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Form {
        self.condition = condition;
        self
    }

    fn render(&self) -> String {
        let mut text = self.operation.mnemonic().to_owned();
        if self.sized {
            text.push('.');
            text.push_str(self.size.suffix());
        }

        let mut parts: Vec<String> = Vec::with_capacity(3);
        if self.condition != Condition::Unconditional {
            parts.push(self.condition.name().to_owned());
        }
        let relative = self.operation.is_relative();
        for operand in [self.operand1, self.operand2].iter().flatten() {
            if relative {
                parts.push(operand.render_signed(self.size));
            } else {
                parts.push(operand.to_string());
            }
        }
        if !parts.is_empty() {
            text.push(' ');
            text.push_str(&parts.join(", "));
        }
        text
    }
}

/// A fully decoded instruction. Immutable once built; the execution
/// engine consumes it exactly once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedOperation {
    base_address: u32,
    opcode: Vec<u8>,
    form: Form,
    fetch_cycles: u32,
    display: String,
}

impl DecodedOperation {
    pub fn new(base_address: u32, opcode: Vec<u8>, form: Form, fetch_cycles: u32) -> Self {
        let display = form.render();
        DecodedOperation {
            base_address,
            opcode,
            form,
            fetch_cycles,
            display,
        }
    }

    /// An operation the CPU raises itself. It owns no bytes and costs
    /// nothing to fetch.
    pub fn synthetic(base_address: u32, form: Form) -> Self {
        DecodedOperation::new(base_address, Vec::new(), form, 0)
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn opcode(&self) -> &[u8] {
        &self.opcode
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> u32 {
        self.opcode.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.opcode.is_empty()
    }

    pub fn operation(&self) -> Operation {
        self.form.operation
    }

    pub fn size(&self) -> OperandSize {
        self.form.size
    }

    pub fn operand1(&self) -> Option<&Operand> {
        self.form.operand1.as_ref()
    }

    pub fn operand2(&self) -> Option<&Operand> {
        self.form.operand2.as_ref()
    }

    pub fn condition(&self) -> Condition {
        self.form.condition
    }

    pub fn fetch_cycles(&self) -> u32 {
        self.fetch_cycles
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl fmt::Display for DecodedOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.display)
    }
}
