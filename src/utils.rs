//! Width-generic bit and arithmetic helpers shared by the ALU, the
//! decoder and the execution engine.

use crate::instr::OperandSize;

/// Sign-extend the low `bits` bits of `value` to a full 32-bit word.
pub fn sign_extend(value: u32, bits: u32) -> u32 {
    if bits == 0 || bits >= 32 {
        return value;
    }
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

/// Sign-extend a value of the given operand size to 32 bits.
pub fn sign_extend_size(value: u32, size: OperandSize) -> u32 {
    sign_extend(value, size.bits())
}

/// Interpret the low `size` bits of `value` as a two's complement integer.
pub fn as_signed(value: u32, size: OperandSize) -> i64 {
    i64::from(sign_extend_size(value & size.mask(), size) as i32)
}

pub fn is_negative(value: u32, size: OperandSize) -> bool {
    value & size.sign_bit() != 0
}

pub fn is_zero(value: u32, size: OperandSize) -> bool {
    value & size.mask() == 0
}

/// True when the masked value has an even number of set bits.
pub fn parity_even(value: u32, size: OperandSize) -> bool {
    (value & size.mask()).count_ones() % 2 == 0
}

/// Unsigned carry out of `a + b + carry` at the given width.
pub fn carry_out(a: u32, b: u32, carry: bool, size: OperandSize) -> bool {
    let sum = u64::from(a & size.mask()) + u64::from(b & size.mask()) + u64::from(carry);
    sum > u64::from(size.mask())
}

/// Unsigned borrow out of `a - b - borrow` at the given width.
pub fn borrow_out(a: u32, b: u32, borrow: bool, size: OperandSize) -> bool {
    u64::from(a & size.mask()) < u64::from(b & size.mask()) + u64::from(borrow)
}

/// Signed overflow of an addition that produced `result`.
pub fn add_overflow(a: u32, b: u32, result: u32, size: OperandSize) -> bool {
    (a ^ result) & (b ^ result) & size.sign_bit() != 0
}

/// Signed overflow of a subtraction that produced `result`.
pub fn sub_overflow(a: u32, b: u32, result: u32, size: OperandSize) -> bool {
    (a ^ b) & (a ^ result) & size.sign_bit() != 0
}

/// Carry from bit 3 into bit 4. Only meaningful for byte operations.
pub fn half_carry(a: u32, b: u32, carry: bool) -> bool {
    (a & 0x0f) + (b & 0x0f) + u32::from(carry) > 0x0f
}

/// Borrow from bit 4 into bit 3. Only meaningful for byte operations.
pub fn half_borrow(a: u32, b: u32, borrow: bool) -> bool {
    (a & 0x0f) < (b & 0x0f) + u32::from(borrow)
}

/// Split a value into its (low, high) halves.
pub fn halves(value: u32, size: OperandSize) -> (u32, u32) {
    let half = size.bits() / 2;
    let half_mask = (1u32 << half) - 1;
    (value & half_mask, (value >> half) & half_mask)
}

/// Join (low, high) halves back into a value of the given size.
pub fn join_halves(low: u32, high: u32, size: OperandSize) -> u32 {
    let half = size.bits() / 2;
    let half_mask = (1u32 << half) - 1;
    ((low & half_mask) | ((high & half_mask) << half)) & size.mask()
}
