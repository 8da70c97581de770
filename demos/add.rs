use color_eyre::eyre::Result;

use simple_logger::SimpleLogger;
use vm8::cpu::Cpu;
use vm8::memory::Ram;
use vm8::write_instructions;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().init().unwrap(); // logging

    let mut mem = Ram::default();
    let mut cpu = Cpu::new();

    use vm8::cpu::Instruction::*;
    write_instructions!(mem : 0 =>
        LDI, 0, 8,
        LDI, 1, 9,
        ADD, 0, 1,
        PRN, 0,
        HLT
    );

    cpu.run(&mut mem)?;

    Ok(())
}
