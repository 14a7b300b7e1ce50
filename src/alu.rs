//! Width-generic ALU. Every function works on the low `size` bytes of
//! its inputs and returns a masked result together with a complete set
//! of arithmetic flags. Handlers that leave some flags untouched copy
//! them back from the register file themselves.

use crate::instr::OperandSize;
use crate::registers::FlagState;
use crate::utils::{
    add_overflow, borrow_out, carry_out, half_borrow, half_carry, halves, is_negative, is_zero,
    join_halves, parity_even, sign_extend, sub_overflow,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AluResult {
    pub value: u32,
    pub flags: FlagState,
}

/// Rotate and shift flavours.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Shift {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Srl,
}

fn sign_zero(value: u32, size: OperandSize) -> FlagState {
    FlagState {
        sign: is_negative(value, size),
        zero: is_zero(value, size),
        ..FlagState::default()
    }
}

/// Add with optional carry in.
#[must_use]
pub fn add(a: u32, b: u32, carry: bool, size: OperandSize) -> AluResult {
    let value = a.wrapping_add(b).wrapping_add(u32::from(carry)) & size.mask();
    AluResult {
        value,
        flags: FlagState {
            half_carry: size == OperandSize::Byte && half_carry(a, b, carry),
            parity_overflow: add_overflow(a, b, value, size),
            subtract: false,
            carry: carry_out(a, b, carry, size),
            ..sign_zero(value, size)
        },
    }
}

/// Subtract with optional borrow in. Also used for compares.
#[must_use]
pub fn sub(a: u32, b: u32, borrow: bool, size: OperandSize) -> AluResult {
    let value = a.wrapping_sub(b).wrapping_sub(u32::from(borrow)) & size.mask();
    AluResult {
        value,
        flags: FlagState {
            half_carry: size == OperandSize::Byte && half_borrow(a, b, borrow),
            parity_overflow: sub_overflow(a, b, value, size),
            subtract: true,
            carry: borrow_out(a, b, borrow, size),
            ..sign_zero(value, size)
        },
    }
}

#[must_use]
pub fn inc(a: u32, size: OperandSize) -> AluResult {
    add(a, 1, false, size)
}

#[must_use]
pub fn dec(a: u32, size: OperandSize) -> AluResult {
    sub(a, 1, false, size)
}

#[must_use]
pub fn neg(a: u32, size: OperandSize) -> AluResult {
    sub(0, a, false, size)
}

fn logical(value: u32, half_carry: bool, size: OperandSize) -> AluResult {
    let value = value & size.mask();
    AluResult {
        value,
        flags: FlagState {
            half_carry,
            parity_overflow: parity_even(value, size),
            ..sign_zero(value, size)
        },
    }
}

/// AND always sets half-carry.
#[must_use]
pub fn and(a: u32, b: u32, size: OperandSize) -> AluResult {
    logical(a & b, true, size)
}

#[must_use]
pub fn or(a: u32, b: u32, size: OperandSize) -> AluResult {
    logical(a | b, false, size)
}

#[must_use]
pub fn xor(a: u32, b: u32, size: OperandSize) -> AluResult {
    logical(a ^ b, false, size)
}

#[must_use]
pub fn cpl(a: u32, size: OperandSize) -> AluResult {
    logical(!a, false, size)
}

/// True when bit `index` of `value` is set. The index wraps at the
/// operand width.
#[must_use]
pub fn test_bit(value: u32, index: u32, size: OperandSize) -> bool {
    value & (1 << (index % size.bits())) != 0
}

#[must_use]
pub fn set_bit(value: u32, index: u32, size: OperandSize) -> u32 {
    (value | (1 << (index % size.bits()))) & size.mask()
}

#[must_use]
pub fn reset_bit(value: u32, index: u32, size: OperandSize) -> u32 {
    value & !(1 << (index % size.bits())) & size.mask()
}

// Fewest single-bit steps that end in the same value and carry as
// `count` steps. Rotates are periodic; plain shifts settle once every
// bit has been pushed out.
fn settled_steps(kind: Shift, count: u32, size: OperandSize) -> u32 {
    let bits = size.bits();
    match kind {
        Shift::Rlc | Shift::Rrc if count == 0 => 0,
        Shift::Rlc | Shift::Rrc => (count - 1) % bits + 1,
        Shift::Rl | Shift::Rr => count % (bits + 1),
        Shift::Sla | Shift::Sra | Shift::Srl => count.min(bits + 1),
    }
}

/// Rotate or shift `value` by `count` single-bit steps. The count is
/// not masked to the operand width. Carry is the last bit shifted out;
/// a zero count leaves `carry` as it was.
#[must_use]
pub fn shift(kind: Shift, value: u32, count: u32, carry: bool, size: OperandSize) -> AluResult {
    let top = size.bits() - 1;
    let mut v = value & size.mask();
    let mut c = carry;

    for _ in 0..settled_steps(kind, count, size) {
        let msb = (v >> top) & 1 != 0;
        let lsb = v & 1 != 0;
        v = match kind {
            Shift::Rlc => (v << 1) | u32::from(msb),
            Shift::Rl => (v << 1) | u32::from(c),
            Shift::Sla => v << 1,
            Shift::Rrc => (v >> 1) | (u32::from(lsb) << top),
            Shift::Rr => (v >> 1) | (u32::from(c) << top),
            Shift::Sra => (v >> 1) | (v & size.sign_bit()),
            Shift::Srl => v >> 1,
        } & size.mask();
        c = match kind {
            Shift::Rlc | Shift::Rl | Shift::Sla => msb,
            Shift::Rrc | Shift::Rr | Shift::Sra | Shift::Srl => lsb,
        };
    }

    AluResult {
        value: v,
        flags: FlagState {
            parity_overflow: parity_even(v, size),
            carry: c,
            ..sign_zero(v, size)
        },
    }
}

/// Decimal-adjust the low byte of the accumulator after a BCD add or
/// subtract, using the incoming N, H and C flags.
#[must_use]
pub fn daa(a: u32, flags: FlagState) -> AluResult {
    let a = a & 0xff;
    let mut correction = 0;
    let mut carry = flags.carry;

    if flags.half_carry || (a & 0x0f) > 9 {
        correction |= 0x06;
    }
    if flags.carry || a > 0x99 {
        correction |= 0x60;
        carry = true;
    }

    let value = if flags.subtract {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    } & 0xff;

    AluResult {
        value,
        flags: FlagState {
            half_carry: (a ^ value) & 0x10 != 0,
            parity_overflow: parity_even(value, OperandSize::Byte),
            subtract: flags.subtract,
            carry,
            ..sign_zero(value, OperandSize::Byte)
        },
    }
}

/// Sign-extend the low half of `value` across the whole operand.
#[must_use]
pub fn ext(value: u32, size: OperandSize) -> u32 {
    sign_extend(value, size.bits() / 2) & size.mask()
}

/// Multiply the low half by the high half.
#[must_use]
pub fn mlt(value: u32, size: OperandSize) -> u32 {
    let (low, high) = halves(value, size);
    low.wrapping_mul(high) & size.mask()
}

/// Divide the high half by the low half, leaving the quotient in the
/// low half and the remainder in the high half. `None` on a zero divisor.
#[must_use]
pub fn div(value: u32, size: OperandSize, signed: bool) -> Option<u32> {
    let (divisor, dividend) = halves(value, size);
    if divisor == 0 {
        return None;
    }

    let half_bits = size.bits() / 2;
    let (quotient, remainder) = if signed {
        let n = sign_extend(dividend, half_bits) as i32;
        let d = sign_extend(divisor, half_bits) as i32;
        (n.wrapping_div(d) as u32, n.wrapping_rem(d) as u32)
    } else {
        (dividend / divisor, dividend % divisor)
    };

    Some(join_halves(quotient, remainder, size))
}

/// Cycles spent inside the multiplier/divider: one per bit of the half
/// width plus one per set bit of the operand.
#[must_use]
pub fn mul_div_cycles(value: u32, size: OperandSize) -> u32 {
    size.bits() / 2 + (value & size.mask()).count_ones()
}
