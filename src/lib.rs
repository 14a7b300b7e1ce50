pub mod alu;
pub mod bus;
pub mod config;
pub mod cpu;
pub mod decode;
pub mod err;
pub mod history;
pub mod instr;
pub mod mem;
pub mod registers;
pub mod utils;

pub use crate::bus::Bus;
pub use crate::config::{Config, Timing};
pub use crate::cpu::{Cpu, InterruptMode};
pub use crate::err::CpuError;
pub use crate::instr::{DecodedOperation, OperandSize, Operation};
pub use crate::mem::Mem;
pub use crate::registers::{RegisterFile, RegisterTarget};
