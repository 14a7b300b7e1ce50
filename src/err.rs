use crate::instr::{OperandSize, Operation};

use std::fmt;
use thiserror::Error;

/// Failures reported by a bus collaborator.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum BusError {
    #[error("address {0:08x} out of range")]
    Range(u32),
    #[error("address {0:08x} is read-only")]
    ReadOnly(u32),
}

/// The instruction formats, used to say where a decode went wrong.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Format {
    RegisterRegister,
    RegisterMemory,
    UnaryRegister,
    UnaryMemory,
    Branch,
    Nullary,
    SingleByte,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Format::RegisterRegister => "register-register",
            Format::RegisterMemory => "register-memory",
            Format::UnaryRegister => "unary register",
            Format::UnaryMemory => "unary memory",
            Format::Branch => "branch",
            Format::Nullary => "nullary",
            Format::SingleByte => "single-byte",
        };
        f.write_str(name)
    }
}

/// Fields of an opcode word.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Field {
    Subgroup,
    Operation,
    Family,
    Size,
    Condition,
    Destination,
    Source,
    Register,
    Target,
    Displacement,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Field::Subgroup => "subgroup",
            Field::Operation => "operation",
            Field::Family => "family",
            Field::Size => "size",
            Field::Condition => "condition",
            Field::Destination => "destination",
            Field::Source => "source",
            Field::Register => "register",
            Field::Target => "target",
            Field::Displacement => "displacement",
        };
        f.write_str(name)
    }
}

/// A bit pattern the decoder refuses.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum EncodingError {
    #[error("unassigned {field} value {value:#b} in {format} instruction")]
    UnassignedSelector {
        format: Format,
        field: Field,
        value: u16,
    },
    #[error("register code 0b111 is not allowed as the {field} of a {format} instruction")]
    IllegalRegisterCode { format: Format, field: Field },
}

/// An operation handed to the executor in a shape its handler cannot
/// accept. The decoder never produces these; they indicate a bug in
/// whatever built the operation.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ContractViolation {
    #[error("{operation:?} expects {expected} operand(s)")]
    Arity {
        operation: Operation,
        expected: usize,
    },
    #[error("{operation:?} cannot write back to an immediate operand")]
    ImmediateWriteback { operation: Operation },
    #[error("{operation:?} requires a register operand")]
    RegisterRequired { operation: Operation },
    #[error("{operation:?} requires a memory operand")]
    MemoryRequired { operation: Operation },
    #[error("{operation:?} does not support size {size:?}")]
    UnsupportedSize {
        operation: Operation,
        size: OperandSize,
    },
}

#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum CpuError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}
