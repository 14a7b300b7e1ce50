//! The IM8000 register file.
//!
//! All registers live in one packed little-endian byte store. Each named
//! single register (A, B, ... SPH) is a 16-bit cell, and each pair is a
//! 32-bit view over two adjacent cells, so writing BC is visible through
//! B and C and vice versa. The alternate set mirrors the primary set 28
//! bytes further along.

use crate::instr::OperandSize;

use std::fmt;

const REGISTER_FILE_LEN: usize = 67;
const ALTERNATE_OFFSET: usize = 28;

pub const F_CARRY: u16 = 0x01;
pub const F_SUBTRACT: u16 = 0x02;
pub const F_PARITY_OVERFLOW: u16 = 0x04;
pub const F_HALF_CARRY: u16 = 0x10;
pub const F_ZERO: u16 = 0x40;
pub const F_SIGN: u16 = 0x80;
pub const F_ENABLE_INTERRUPTS: u16 = 0x100;

/// Every addressable register view.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RegisterTarget {
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
    IXH,
    IXL,
    IYH,
    IYL,
    SPH,
    SPL,
    AF,
    BC,
    DE,
    HL,
    IX,
    IY,
    SP,
    AAlt,
    FAlt,
    BAlt,
    CAlt,
    DAlt,
    EAlt,
    HAlt,
    LAlt,
    IXHAlt,
    IXLAlt,
    IYHAlt,
    IYLAlt,
    SPHAlt,
    SPLAlt,
    AFAlt,
    BCAlt,
    DEAlt,
    HLAlt,
    IXAlt,
    IYAlt,
    SPAlt,
    PC,
    I,
    R,
    IFF2,
}

impl RegisterTarget {
    /// Byte offset of this view inside the register file.
    pub fn offset(self) -> usize {
        use RegisterTarget::*;
        match self {
            F | AF => 0,
            A => 2,
            C | BC => 4,
            B => 6,
            E | DE => 8,
            D => 10,
            L | HL => 12,
            H => 14,
            IXL | IX => 16,
            IXH => 18,
            IYL | IY => 20,
            IYH => 22,
            SPL | SP => 24,
            SPH => 26,
            FAlt | AFAlt => ALTERNATE_OFFSET,
            AAlt => ALTERNATE_OFFSET + 2,
            CAlt | BCAlt => ALTERNATE_OFFSET + 4,
            BAlt => ALTERNATE_OFFSET + 6,
            EAlt | DEAlt => ALTERNATE_OFFSET + 8,
            DAlt => ALTERNATE_OFFSET + 10,
            LAlt | HLAlt => ALTERNATE_OFFSET + 12,
            HAlt => ALTERNATE_OFFSET + 14,
            IXLAlt | IXAlt => ALTERNATE_OFFSET + 16,
            IXHAlt => ALTERNATE_OFFSET + 18,
            IYLAlt | IYAlt => ALTERNATE_OFFSET + 20,
            IYHAlt => ALTERNATE_OFFSET + 22,
            SPLAlt | SPAlt => ALTERNATE_OFFSET + 24,
            SPHAlt => ALTERNATE_OFFSET + 26,
            PC => 56,
            I => 60,
            R => 64,
            IFF2 => 66,
        }
    }

    /// The widest access this view supports.
    pub fn width(self) -> OperandSize {
        use RegisterTarget::*;
        match self {
            AF | BC | DE | HL | IX | IY | SP | AFAlt | BCAlt | DEAlt | HLAlt | IXAlt | IYAlt
            | SPAlt | PC | I => OperandSize::DWord,
            IFF2 => OperandSize::Byte,
            _ => OperandSize::Word,
        }
    }

    /// The matching register in the alternate set, if there is one.
    pub fn alternate(self) -> Option<RegisterTarget> {
        use RegisterTarget::*;
        let alt = match self {
            A => AAlt,
            F => FAlt,
            B => BAlt,
            C => CAlt,
            D => DAlt,
            E => EAlt,
            H => HAlt,
            L => LAlt,
            IXH => IXHAlt,
            IXL => IXLAlt,
            IYH => IYHAlt,
            IYL => IYLAlt,
            SPH => SPHAlt,
            SPL => SPLAlt,
            AF => AFAlt,
            BC => BCAlt,
            DE => DEAlt,
            HL => HLAlt,
            IX => IXAlt,
            IY => IYAlt,
            SP => SPAlt,
            _ => return None,
        };
        Some(alt)
    }

    pub fn name(self) -> &'static str {
        use RegisterTarget::*;
        match self {
            A => "A",
            F => "F",
            B => "B",
            C => "C",
            D => "D",
            E => "E",
            H => "H",
            L => "L",
            IXH => "IXH",
            IXL => "IXL",
            IYH => "IYH",
            IYL => "IYL",
            SPH => "SPH",
            SPL => "SPL",
            AF => "AF",
            BC => "BC",
            DE => "DE",
            HL => "HL",
            IX => "IX",
            IY => "IY",
            SP => "SP",
            AAlt => "A'",
            FAlt => "F'",
            BAlt => "B'",
            CAlt => "C'",
            DAlt => "D'",
            EAlt => "E'",
            HAlt => "H'",
            LAlt => "L'",
            IXHAlt => "IXH'",
            IXLAlt => "IXL'",
            IYHAlt => "IYH'",
            IYLAlt => "IYL'",
            SPHAlt => "SPH'",
            SPLAlt => "SPL'",
            AFAlt => "AF'",
            BCAlt => "BC'",
            DEAlt => "DE'",
            HLAlt => "HL'",
            IXAlt => "IX'",
            IYAlt => "IY'",
            SPAlt => "SP'",
            PC => "PC",
            I => "I",
            R => "R",
            IFF2 => "IFF2",
        }
    }
}

impl fmt::Display for RegisterTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The six arithmetic flags, detached from the F register.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FlagState {
    pub sign: bool,
    pub zero: bool,
    pub half_carry: bool,
    pub parity_overflow: bool,
    pub subtract: bool,
    pub carry: bool,
}

impl FlagState {
    pub fn from_bits(bits: u16) -> FlagState {
        FlagState {
            sign: bits & F_SIGN != 0,
            zero: bits & F_ZERO != 0,
            half_carry: bits & F_HALF_CARRY != 0,
            parity_overflow: bits & F_PARITY_OVERFLOW != 0,
            subtract: bits & F_SUBTRACT != 0,
            carry: bits & F_CARRY != 0,
        }
    }

    pub fn bits(&self) -> u16 {
        let mut bits = 0;
        if self.sign {
            bits |= F_SIGN;
        }
        if self.zero {
            bits |= F_ZERO;
        }
        if self.half_carry {
            bits |= F_HALF_CARRY;
        }
        if self.parity_overflow {
            bits |= F_PARITY_OVERFLOW;
        }
        if self.subtract {
            bits |= F_SUBTRACT;
        }
        if self.carry {
            bits |= F_CARRY;
        }
        bits
    }
}

const ARITHMETIC_FLAGS: u16 =
    F_SIGN | F_ZERO | F_HALF_CARRY | F_PARITY_OVERFLOW | F_SUBTRACT | F_CARRY;

#[derive(Clone, Eq, PartialEq)]
pub struct RegisterFile {
    bytes: [u8; REGISTER_FILE_LEN],
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new()
    }
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile {
            bytes: [0; REGISTER_FILE_LEN],
        }
    }

    pub fn clear(&mut self) {
        self.bytes = [0; REGISTER_FILE_LEN];
    }

    /// Read `size` bytes of the view starting at the target's offset.
    ///
    /// A size wider than the target's natural width reads through into
    /// the neighbouring cell, exactly as the packed layout implies.
    pub fn get(&self, target: RegisterTarget, size: OperandSize) -> u32 {
        let offset = target.offset();
        let len = size.bytes().min(REGISTER_FILE_LEN - offset);
        let mut buf = [0u8; 4];
        buf[..len].copy_from_slice(&self.bytes[offset..offset + len]);
        u32::from_le_bytes(buf)
    }

    /// Write the low `size` bytes of `value` into the target's storage.
    pub fn set(&mut self, target: RegisterTarget, size: OperandSize, value: u32) {
        let offset = target.offset();
        let len = size.bytes().min(REGISTER_FILE_LEN - offset);
        self.bytes[offset..offset + len].copy_from_slice(&value.to_le_bytes()[..len]);
    }

    pub fn pc(&self) -> u32 {
        self.get(RegisterTarget::PC, OperandSize::DWord)
    }

    pub fn set_pc(&mut self, value: u32) {
        self.set(RegisterTarget::PC, OperandSize::DWord, value);
    }

    pub fn sp(&self) -> u32 {
        self.get(RegisterTarget::SP, OperandSize::DWord)
    }

    pub fn set_sp(&mut self, value: u32) {
        self.set(RegisterTarget::SP, OperandSize::DWord, value);
    }

    fn f(&self) -> u16 {
        self.get(RegisterTarget::F, OperandSize::Word) as u16
    }

    fn set_f(&mut self, value: u16) {
        self.set(RegisterTarget::F, OperandSize::Word, u32::from(value));
    }

    /// Test one or more flag bits of F.
    pub fn flag(&self, mask: u16) -> bool {
        self.f() & mask != 0
    }

    /// Set or clear flag bits in F. Changing the interrupt enable bit
    /// (IFF1) also records the new state in IFF2.
    pub fn set_flag(&mut self, mask: u16, value: bool) {
        let f = if value {
            self.f() | mask
        } else {
            self.f() & !mask
        };
        self.set_f(f);

        if mask & F_ENABLE_INTERRUPTS != 0 {
            self.set_iff2(value);
        }
    }

    pub fn flags(&self) -> FlagState {
        FlagState::from_bits(self.f())
    }

    /// Replace the arithmetic flags, leaving the interrupt enable bit alone.
    pub fn set_flags(&mut self, flags: FlagState) {
        let f = (self.f() & !ARITHMETIC_FLAGS) | flags.bits();
        self.set_f(f);
    }

    pub fn iff1(&self) -> bool {
        self.flag(F_ENABLE_INTERRUPTS)
    }

    /// Clear IFF1 without touching IFF2.
    pub fn clear_iff1(&mut self) {
        let f = self.f() & !F_ENABLE_INTERRUPTS;
        self.set_f(f);
    }

    pub fn iff2(&self) -> bool {
        self.get(RegisterTarget::IFF2, OperandSize::Byte) != 0
    }

    fn set_iff2(&mut self, value: bool) {
        self.set(RegisterTarget::IFF2, OperandSize::Byte, u32::from(value));
    }

    /// Copy IFF2 back into IFF1.
    pub fn restore_iff1(&mut self) {
        let iff2 = self.iff2();
        let f = if iff2 {
            self.f() | F_ENABLE_INTERRUPTS
        } else {
            self.f() & !F_ENABLE_INTERRUPTS
        };
        self.set_f(f);
    }

    /// Swap `size` bytes of a primary register with its alternate.
    /// Targets without an alternate are left untouched.
    pub fn exchange_with_alternate(&mut self, target: RegisterTarget, size: OperandSize) {
        if let Some(alt) = target.alternate() {
            let primary = self.get(target, size);
            let alternate = self.get(alt, size);
            self.set(target, size, alternate);
            self.set(alt, size, primary);
        }
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RegisterFile {{ {} }}", self)
    }
}

impl fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RegisterTarget::*;
        let flags = self.flags();
        let flag_char = |set: bool, c: char| if set { c } else { '-' };

        for target in [AF, BC, DE, HL, IX, IY, SP].iter() {
            write!(f, "{}={:08x} ", target, self.get(*target, OperandSize::DWord))?;
        }
        write!(
            f,
            "PC={:08x} I={:08x} R={:04x} [{}{}{}{}{}{}{}]",
            self.pc(),
            self.get(I, OperandSize::DWord),
            self.get(R, OperandSize::Word),
            flag_char(flags.sign, 'S'),
            flag_char(flags.zero, 'Z'),
            flag_char(flags.half_carry, 'H'),
            flag_char(flags.parity_overflow, 'P'),
            flag_char(flags.subtract, 'N'),
            flag_char(flags.carry, 'C'),
            flag_char(self.iff1(), 'I'),
        )
    }
}
