use std::convert::TryFrom;
use std::{error, fmt};

use crate::memory::{Byte, Memory, Word};
use color_eyre::eyre::Result;
use log::*;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

pub mod alu;

pub use alu::Flags;

/// Number of general-purpose registers
pub const NUM_REGISTERS: usize = 8;
/// Register 7 doubles as the stack pointer
pub const SP: usize = 7;
/// Initial stack pointer value, one past the top of the empty stack
pub const STACK_TOP: Byte = 0xF4;

/// A fatal execution condition. Any of these stops the machine
/// immediately; there is no recovery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The fetched byte is not mapped in the instruction set
    UnknownOpcode { opcode: Byte, address: Word },
    /// The program counter or a computed address left the address space
    AddressOutOfRange { address: Word },
    /// DIV or MOD with a zero divisor
    DivisionByZero,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::UnknownOpcode { opcode, address } => {
                write!(f, "unknown opcode 0x{:02X} at address 0x{:02X}", opcode, address)
            }
            ExecError::AddressOutOfRange { address } => {
                write!(f, "address 0x{:04X} is outside of memory", address)
            }
            ExecError::DivisionByZero => f.write_str("division by zero"),
        }
    }
}

impl error::Error for ExecError {}

/// Emulates a CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cpu {
    /// General-purpose registers; `reg[SP]` is the stack pointer
    pub reg: [Byte; NUM_REGISTERS],
    /// Program counter
    pub pc: Word,
    /// Outcome of the most recent comparison
    pub fl: Flags,
    /// Termination flag. Set to true when the program executed HLT
    pub halted: bool,
}

impl Default for Cpu {
    /// Initializes a new CPU
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Initializes a new CPU with all registers zeroed and the stack
    /// pointer at the top of the empty stack
    pub fn new() -> Self {
        let mut reg = [0; NUM_REGISTERS];
        reg[SP] = STACK_TOP;

        Self {
            reg,
            pc: 0,
            fl: Flags::default(),
            halted: false,
        }
    }

    /// Executes a single, already decoded instruction
    pub fn execute_instruction<const S: usize>(
        &mut self,
        instruction: Instruction,
        a: Byte,
        b: Byte,
        memory: &mut Memory<S>,
    ) -> Result<()> {
        match instruction {
            Instruction::NOP => {
                debug!("NOP");
            }
            Instruction::HLT => {
                self.halted = true;

                debug!("HLT");
            }
            Instruction::LDI => {
                self.reg[reg(a)] = b;

                debug!("LDI R{} {}", reg(a), b);
            }
            Instruction::LD => {
                let address = self.reg[reg(b)];
                self.reg[reg(a)] = memory.read_byte(address as Word);

                debug!("LD R{} R{}", reg(a), reg(b));
            }
            Instruction::ST => {
                let address = self.reg[reg(a)];
                memory.write_byte(address as Word, self.reg[reg(b)]);

                debug!("ST R{} R{}", reg(a), reg(b));
            }
            Instruction::PUSH => {
                let value = self.reg[reg(a)];
                self.push(memory, value);

                debug!("PUSH R{}: {}", reg(a), value);
            }
            Instruction::POP => {
                let value = self.pop(memory);
                self.reg[reg(a)] = value;

                debug!("POP R{}: {}", reg(a), value);
            }
            Instruction::PRN => {
                println!("{}", self.reg[reg(a)]);

                debug!("PRN R{}", reg(a));
            }
            Instruction::PRA => {
                print!("{}", char::from(self.reg[reg(a)]));

                debug!("PRA R{}", reg(a));
            }
            Instruction::CALL => {
                // The return address is the instruction after the CALL.
                let ret = self.pc + 1 + instruction.operand_count();
                if ret as usize >= S {
                    return Err(ExecError::AddressOutOfRange { address: ret }.into());
                }
                self.push(memory, ret as Byte);
                self.pc = self.reg[reg(a)] as Word;

                debug!("CALL R{}", reg(a));
            }
            Instruction::RET => {
                self.pc = self.pop(memory) as Word;

                debug!("RET");
            }
            Instruction::INT | Instruction::IRET => {
                // Reserved slots; nothing to do until interrupts are wired up,
                // but they opted out of the default advance and so step past
                // themselves.
                self.pc += 1 + instruction.operand_count();

                debug!("{} (stub)", instruction);
            }
            Instruction::JMP => {
                self.pc = self.reg[reg(a)] as Word;

                debug!("JMP R{}", reg(a));
            }
            Instruction::JEQ => self.branch(instruction, self.fl.equal, a),
            Instruction::JNE => self.branch(instruction, !self.fl.equal, a),
            Instruction::JGT => self.branch(instruction, self.fl.greater, a),
            Instruction::JLT => self.branch(instruction, self.fl.less, a),
            Instruction::JLE => self.branch(instruction, self.fl.less || self.fl.equal, a),
            Instruction::JGE => self.branch(instruction, self.fl.greater || self.fl.equal, a),
            Instruction::ADD
            | Instruction::SUB
            | Instruction::MUL
            | Instruction::DIV
            | Instruction::MOD
            | Instruction::INC
            | Instruction::DEC
            | Instruction::CMP
            | Instruction::AND
            | Instruction::OR
            | Instruction::XOR
            | Instruction::NOT
            | Instruction::SHL
            | Instruction::SHR => self.execute_alu(instruction, a, b)?,
        }

        Ok(())
    }

    /// Runs one fetch-decode-execute step
    pub fn step<const S: usize>(&mut self, memory: &mut Memory<S>) -> Result<()> {
        let pc = self.pc;
        if pc as usize >= S {
            return Err(ExecError::AddressOutOfRange { address: pc }.into());
        }

        let opcode = memory.read_byte(pc);
        // Both operand bytes are fetched up front whether the opcode needs
        // them or not; reads have no side effects and the prefetch addresses
        // wrap at the end of memory.
        let a = memory.read_byte(((pc as usize + 1) % S) as Word);
        let b = memory.read_byte(((pc as usize + 2) % S) as Word);

        trace!("{:02X} | {:02X} {:02X} {:02X} | {:02X?}", pc, opcode, a, b, self.reg);

        let instruction = Instruction::try_from(opcode)
            .map_err(|_| ExecError::UnknownOpcode { opcode, address: pc })?;

        self.execute_instruction(instruction, a, b, memory)?;

        if !instruction.sets_pc() {
            self.pc = pc + 1 + instruction.operand_count();
        }

        Ok(())
    }

    /// Run the fetch-decode-execute loop until the program halts
    pub fn run<const S: usize>(&mut self, memory: &mut Memory<S>) -> Result<()> {
        while !self.halted {
            self.step(memory)?;
        }

        info!("Program halted at address 0x{:02X}", self.pc);

        Ok(())
    }

    /// Routes an ALU-class instruction through [`alu::eval`]. CMP updates
    /// the flags; every other operation writes back to the first operand
    /// register.
    fn execute_alu(&mut self, instruction: Instruction, a: Byte, b: Byte) -> Result<()> {
        // The low nibble of an ALU-class opcode selects the operation.
        let op = alu::Op::try_from(u8::from(instruction) & 0b0000_1111).map_err(|_| {
            ExecError::UnknownOpcode {
                opcode: instruction.into(),
                address: self.pc,
            }
        })?;

        match alu::eval(op, self.reg[reg(a)], self.reg[reg(b)])? {
            alu::Output::Value(value) => self.reg[reg(a)] = value,
            alu::Output::Flags(fl) => self.fl = fl,
        }

        debug!("{} R{} R{}", instruction, reg(a), reg(b));

        Ok(())
    }

    /// A declined branch still has to step past its operand itself, since
    /// branch opcodes opt out of the default advance.
    fn branch(&mut self, instruction: Instruction, taken: bool, a: Byte) {
        if taken {
            self.pc = self.reg[reg(a)] as Word;
        } else {
            self.pc += 1 + instruction.operand_count();
        }

        debug!("{} R{}: {}", instruction, reg(a), taken);
    }

    /// Decrement the stack pointer, then write `value` at it. The stack
    /// pointer wraps within the 256-byte address space.
    fn push<const S: usize>(&mut self, memory: &mut Memory<S>, value: Byte) {
        self.reg[SP] = self.reg[SP].wrapping_sub(1);
        memory.write_byte(self.reg[SP] as Word, value);
    }

    /// Read the byte at the stack pointer, then increment it
    fn pop<const S: usize>(&mut self, memory: &mut Memory<S>) -> Byte {
        let value = memory.read_byte(self.reg[SP] as Word);
        self.reg[SP] = self.reg[SP].wrapping_add(1);
        value
    }
}

/// Register operands address one of the eight registers; only the low
/// three bits are significant.
fn reg(operand: Byte) -> usize {
    (operand & 0b111) as usize
}

macro_rules! instructions {
    ( $( $( #[doc = $doc:expr] )+ $name:ident = $repr:literal , )+ ) => {
        /// Defines the instruction set
        ///
        /// The opcode byte encodes its own shape: bits 7-6 hold the operand
        /// count, bit 5 marks ALU-class instructions, bit 4 marks
        /// instructions which supply the next program counter themselves,
        /// and bits 3-0 identify the operation within its class.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        #[derive(TryFromPrimitive, IntoPrimitive)]
        pub enum Instruction {
            $(
                $( #[doc = $doc] )+
                $name = $repr,
            )+
        }

        impl Instruction {
            pub const ALL: &'static [Self] = &[
                $( Self::$name , )+
            ];

            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name) , )+
                }
            }
        }

        impl ::std::fmt::Display for Instruction {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.name())
            }
        }
    }
}

instructions! {
    /// No operation
    NOP = 0b0000_0000,
    /// Stop the execution of the program
    HLT = 0b0000_0001,
    /// Return from a subroutine by popping the program counter off the stack
    RET = 0b0001_0001,
    /// Return from an interrupt handler (reserved)
    IRET = 0b0001_0011,
    /// Push a register onto the stack
    /// @param register The register to push
    PUSH = 0b0100_0101,
    /// Pop the top of the stack into a register
    /// @param register The register to pop into
    POP = 0b0100_0110,
    /// Print a register as a decimal number, followed by a newline
    PRN = 0b0100_0111,
    /// Print a register as a single character, without a newline
    PRA = 0b0100_1000,
    /// Call the subroutine whose address is held in a register
    /// @param register The register holding the subroutine address
    CALL = 0b0101_0000,
    /// Trigger the interrupt held in a register (reserved)
    INT = 0b0101_0010,
    /// Jump to the address held in a register
    JMP = 0b0101_0100,
    /// Jump if the last comparison was equal
    JEQ = 0b0101_0101,
    /// Jump if the last comparison was not equal
    JNE = 0b0101_0110,
    /// Jump if the last comparison was greater-than
    JGT = 0b0101_0111,
    /// Jump if the last comparison was less-than
    JLT = 0b0101_1000,
    /// Jump if the last comparison was less-than or equal
    JLE = 0b0101_1001,
    /// Jump if the last comparison was greater-than or equal
    JGE = 0b0101_1010,
    /// Increment a register in place
    INC = 0b0110_0101,
    /// Decrement a register in place
    DEC = 0b0110_0110,
    /// Bitwise NOT a register in place
    NOT = 0b0110_1001,
    /// Load an immediate value into a register
    /// @param register The target register
    /// @param value The value to load
    LDI = 0b1000_0010,
    /// Load a register from the memory address held in another register
    /// @param register The target register
    /// @param address The register holding the address to read
    LD = 0b1000_0011,
    /// Store a register at the memory address held in another register
    /// @param address The register holding the address to write
    /// @param register The register to store
    ST = 0b1000_0100,
    /// Add two registers, result in the first
    ADD = 0b1010_0000,
    /// Subtract the second register from the first, result in the first
    SUB = 0b1010_0001,
    /// Multiply two registers, result in the first
    MUL = 0b1010_0010,
    /// Divide the first register by the second, result in the first
    DIV = 0b1010_0011,
    /// Remainder of dividing the first register by the second
    MOD = 0b1010_0100,
    /// Compare two registers and overwrite the flags with the outcome
    CMP = 0b1010_0111,
    /// Bitwise AND two registers, result in the first
    AND = 0b1010_1000,
    /// Bitwise OR two registers, result in the first
    OR = 0b1010_1010,
    /// Bitwise XOR two registers, result in the first
    XOR = 0b1010_1011,
    /// Shift the first register left by the second, zero-filled
    SHL = 0b1010_1100,
    /// Shift the first register right by the second, zero-filled
    SHR = 0b1010_1101,
}

impl Instruction {
    /// Number of operand bytes following the opcode (bits 7-6)
    pub fn operand_count(self) -> Word {
        (u8::from(self) >> 6) as Word
    }

    /// ALU-class instruction; result and flags come from [`alu::eval`] (bit 5)
    pub fn is_alu(self) -> bool {
        u8::from(self) & 0b0010_0000 != 0
    }

    /// The handler supplies the next program counter itself (bit 4)
    pub fn sets_pc(self) -> bool {
        u8::from(self) & 0b0001_0000 != 0
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::Ram;
    use crate::write_instructions;

    use super::*;
    use color_eyre::eyre::Result;

    #[test]
    fn test_new_cpu() -> Result<()> {
        let cpu = Cpu::new();

        assert_eq!(cpu.pc, 0);
        assert_eq!(cpu.reg[SP], STACK_TOP);
        assert_eq!(cpu.fl, Flags::default());
        assert!(!cpu.halted);

        Ok(())
    }

    #[test]
    fn test_halt() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        mem.write_byte(0, Instruction::HLT.into());
        cpu.step(&mut mem)?;

        assert!(cpu.halted);
        assert_eq!(cpu.pc, 1);

        Ok(())
    }

    #[test]
    fn test_add_program() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 => LDI, 0, 8, LDI, 1, 9, ADD, 0, 1, PRN, 0, HLT);

        cpu.run(&mut mem)?;

        assert_eq!(cpu.reg[0], 17);
        assert!(cpu.halted);

        Ok(())
    }

    #[test]
    fn test_unknown_opcode_leaves_registers_untouched() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        mem.write_byte(0, 0xFF);
        let err = cpu.run(&mut mem).unwrap_err();

        assert_eq!(
            err.downcast_ref::<ExecError>(),
            Some(&ExecError::UnknownOpcode {
                opcode: 0xFF,
                address: 0
            })
        );
        assert_eq!(cpu.reg, Cpu::new().reg);
        assert!(!cpu.halted);

        Ok(())
    }

    #[test]
    fn test_runaway_pc_is_fatal() -> Result<()> {
        // A zeroed memory is 256 NOPs; the program counter must run off the
        // end instead of wrapping around.
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        let err = cpu.run(&mut mem).unwrap_err();

        assert_eq!(
            err.downcast_ref::<ExecError>(),
            Some(&ExecError::AddressOutOfRange { address: 256 })
        );

        Ok(())
    }

    #[test]
    fn test_push_pop_round_trip() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 => LDI, 2, 5, PUSH, 2, POP, 3, HLT);

        cpu.run(&mut mem)?;

        assert_eq!(cpu.reg[3], 5);
        assert_eq!(cpu.reg[SP], STACK_TOP);

        Ok(())
    }

    #[test]
    fn test_stack_pointer_wraps_within_memory() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        cpu.reg[2] = 7;
        cpu.reg[SP] = 0;
        cpu.execute_instruction(Instruction::PUSH, 2, 0, &mut mem)?;

        assert_eq!(cpu.reg[SP], 0xFF);
        assert_eq!(mem.read_byte(0xFF), 7);

        cpu.execute_instruction(Instruction::POP, 3, 0, &mut mem)?;

        assert_eq!(cpu.reg[3], 7);
        assert_eq!(cpu.reg[SP], 0);

        Ok(())
    }

    #[test]
    fn test_call_returns_to_next_instruction() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 =>
            LDI, 1, 7,   // 0: subroutine address
            CALL, 1,     // 3: return address is 5
            HLT,         // 5
            NOP,         // 6
            LDI, 0, 42,  // 7: subroutine body
            RET          // 10
        );

        cpu.run(&mut mem)?;

        assert_eq!(cpu.reg[0], 42);
        assert_eq!(cpu.reg[SP], STACK_TOP);
        assert_eq!(cpu.pc, 6);
        assert!(cpu.halted);

        Ok(())
    }

    #[test]
    fn test_cmp_equal_takes_jeq() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 =>
            LDI, 0, 5,   // 0
            LDI, 1, 5,   // 3
            CMP, 0, 1,   // 6
            LDI, 2, 17,  // 9
            JEQ, 2,      // 12
            LDI, 3, 1,   // 14: skipped when the jump is taken
            HLT          // 17
        );

        cpu.run(&mut mem)?;

        assert!(cpu.fl.equal);
        assert_eq!(cpu.reg[3], 0);

        Ok(())
    }

    #[test]
    fn test_cmp_unequal_declines_jeq() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 =>
            LDI, 0, 5,
            LDI, 1, 6,
            CMP, 0, 1,
            LDI, 2, 17,
            JEQ, 2,
            LDI, 3, 1,
            HLT
        );

        cpu.run(&mut mem)?;

        assert!(cpu.fl.less);
        assert_eq!(cpu.reg[3], 1);

        Ok(())
    }

    #[test]
    fn test_cmp_unequal_takes_jne() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 =>
            LDI, 0, 5,
            LDI, 1, 6,
            CMP, 0, 1,
            LDI, 2, 17,
            JNE, 2,
            LDI, 3, 1,
            HLT
        );

        cpu.run(&mut mem)?;

        assert_eq!(cpu.reg[3], 0);

        Ok(())
    }

    #[test]
    fn test_ordered_branches() -> Result<()> {
        let mut mem = Ram::default();

        let mut cpu = Cpu::new();
        cpu.reg[0] = 0x20;
        cpu.fl = Flags::compare(9, 3);
        cpu.execute_instruction(Instruction::JGT, 0, 0, &mut mem)?;
        assert_eq!(cpu.pc, 0x20);

        let mut cpu = Cpu::new();
        cpu.reg[0] = 0x20;
        cpu.fl = Flags::compare(1, 3);
        cpu.execute_instruction(Instruction::JGT, 0, 0, &mut mem)?;
        assert_eq!(cpu.pc, 2);

        let mut cpu = Cpu::new();
        cpu.reg[0] = 0x20;
        cpu.fl = Flags::compare(1, 3);
        cpu.execute_instruction(Instruction::JLE, 0, 0, &mut mem)?;
        assert_eq!(cpu.pc, 0x20);

        let mut cpu = Cpu::new();
        cpu.reg[0] = 0x20;
        cpu.fl = Flags::compare(3, 3);
        cpu.execute_instruction(Instruction::JGE, 0, 0, &mut mem)?;
        assert_eq!(cpu.pc, 0x20);

        let mut cpu = Cpu::new();
        cpu.reg[0] = 0x20;
        cpu.fl = Flags::compare(3, 3);
        cpu.execute_instruction(Instruction::JLT, 0, 0, &mut mem)?;
        assert_eq!(cpu.pc, 2);

        Ok(())
    }

    #[test]
    fn test_load_store() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 =>
            LDI, 0, 0x80, // address
            LDI, 1, 99,   // value
            ST, 0, 1,
            LD, 3, 0,
            HLT
        );

        cpu.run(&mut mem)?;

        assert_eq!(mem.read_byte(0x80), 99);
        assert_eq!(cpu.reg[3], 99);

        Ok(())
    }

    #[test]
    fn test_division_by_zero_is_fatal() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        use Instruction::*;
        write_instructions!(mem : 0 => LDI, 0, 10, DIV, 0, 1, HLT);

        let err = cpu.run(&mut mem).unwrap_err();

        assert_eq!(
            err.downcast_ref::<ExecError>(),
            Some(&ExecError::DivisionByZero)
        );

        Ok(())
    }

    #[test]
    fn test_interrupt_stubs_advance() -> Result<()> {
        let mut mem = Ram::default();
        let mut cpu = Cpu::new();

        mem.write_byte(0, Instruction::INT.into());
        cpu.step(&mut mem)?;
        assert_eq!(cpu.pc, 2);

        mem.write_byte(2, Instruction::IRET.into());
        cpu.step(&mut mem)?;
        assert_eq!(cpu.pc, 3);

        Ok(())
    }

    #[test]
    fn test_opcode_encoding_metadata() -> Result<()> {
        for &instruction in Instruction::ALL {
            if instruction.is_alu() {
                // Every ALU-class opcode's low nibble must select an operation.
                assert!(alu::Op::try_from(u8::from(instruction) & 0b0000_1111).is_ok());
            }
        }

        assert_eq!(Instruction::HLT.operand_count(), 0);
        assert_eq!(Instruction::PUSH.operand_count(), 1);
        assert_eq!(Instruction::LDI.operand_count(), 2);

        assert!(Instruction::JMP.sets_pc());
        assert!(Instruction::CALL.sets_pc());
        assert!(Instruction::RET.sets_pc());
        assert!(!Instruction::LDI.sets_pc());

        assert!(Instruction::CMP.is_alu());
        assert!(Instruction::INC.is_alu());
        assert!(!Instruction::PUSH.is_alu());

        Ok(())
    }
}
