use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::ExecError;
use crate::memory::Byte;

/// Outcome of the most recent comparison. CMP overwrites all three
/// bits at once, so exactly one of them is set afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    pub equal: bool,
    pub greater: bool,
    pub less: bool,
}

impl Flags {
    /// Compares two bytes the way CMP does
    pub fn compare(lhs: Byte, rhs: Byte) -> Self {
        use std::cmp::Ordering;

        match lhs.cmp(&rhs) {
            Ordering::Equal => Flags {
                equal: true,
                ..Flags::default()
            },
            Ordering::Greater => Flags {
                greater: true,
                ..Flags::default()
            },
            Ordering::Less => Flags {
                less: true,
                ..Flags::default()
            },
        }
    }
}

/// ALU operation selector, the low nibble of an ALU-class opcode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(TryFromPrimitive, IntoPrimitive)]
pub enum Op {
    Add = 0x0,
    Sub = 0x1,
    Mul = 0x2,
    Div = 0x3,
    Mod = 0x4,
    Inc = 0x5,
    Dec = 0x6,
    Cmp = 0x7,
    And = 0x8,
    Not = 0x9,
    Or = 0xA,
    Xor = 0xB,
    Shl = 0xC,
    Shr = 0xD,
}

/// Result of an ALU operation: a value to write back, or new flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Value(Byte),
    Flags(Flags),
}

/// Evaluates `op` over two register values. Unary operations (INC, DEC,
/// NOT) ignore `rhs`. Arithmetic wraps modulo 256; shifts are logical and
/// produce 0 once the shift count reaches 8.
pub fn eval(op: Op, lhs: Byte, rhs: Byte) -> Result<Output, ExecError> {
    let value = match op {
        Op::Add => lhs.wrapping_add(rhs),
        Op::Sub => lhs.wrapping_sub(rhs),
        Op::Mul => lhs.wrapping_mul(rhs),
        Op::Div => match lhs.checked_div(rhs) {
            Some(value) => value,
            None => return Err(ExecError::DivisionByZero),
        },
        Op::Mod => match lhs.checked_rem(rhs) {
            Some(value) => value,
            None => return Err(ExecError::DivisionByZero),
        },
        Op::Inc => lhs.wrapping_add(1),
        Op::Dec => lhs.wrapping_sub(1),
        Op::Cmp => return Ok(Output::Flags(Flags::compare(lhs, rhs))),
        Op::And => lhs & rhs,
        Op::Not => !lhs,
        Op::Or => lhs | rhs,
        Op::Xor => lhs ^ rhs,
        Op::Shl => lhs.checked_shl(rhs as u32).unwrap_or(0),
        Op::Shr => lhs.checked_shr(rhs as u32).unwrap_or(0),
    };

    Ok(Output::Value(value))
}
